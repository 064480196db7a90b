use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::task::Task;

/// Current task-list frame version. Bump on any change to the `Task` field
/// layout; decoders reject frames with a version they do not know.
pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compress(std::io::Error),

    #[error("decompression error: {0}")]
    Decompress(std::io::Error),

    #[error("task frame serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("task frame deserialization error: {0}")]
    Deserialize(bincode::Error),

    #[error("empty task frame")]
    EmptyFrame,

    #[error("unsupported task frame version {0}")]
    UnsupportedVersion(u8),
}

/// Compress raw bytes with zlib. Used for file bodies and task frames alike.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    Ok(out)
}

/// Encode a task list into the compressed wire frame:
/// one version byte, then the bincode encoding of the list, zlib-compressed
/// as a whole. bincode is length-delimited with a fixed field order, so the
/// frame is deterministic for identical input.
pub fn encode_tasks(tasks: &[Task]) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(tasks).map_err(CodecError::Serialize)?;
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(WIRE_VERSION);
    frame.extend_from_slice(&body);
    compress(&frame)
}

/// Inverse of [`encode_tasks`].
pub fn decode_tasks(data: &[u8]) -> Result<Vec<Task>, CodecError> {
    let frame = decompress(data)?;
    let (&version, body) = frame.split_first().ok_or(CodecError::EmptyFrame)?;
    if version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    bincode::deserialize(body).map_err(CodecError::Deserialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskMessageType;

    fn sample_task() -> Task {
        let mut task = Task::new(
            1,
            "/bin/cat",
            vec!["in1.txt".into()],
            b"hello".to_vec(),
            "in1.txt",
            "out1.txt",
        );
        task.job_id = 7;
        task
    }

    #[test]
    fn test_task_frame_preserves_fields() {
        let mut reported = sample_task();
        reported.message_type = TaskMessageType::Processed;
        reported.payload = b"result bytes".to_vec();

        let wire = encode_tasks(&[sample_task(), reported.clone()]).unwrap();
        let decoded = decode_tasks(&wire).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].message_type, TaskMessageType::Processed);
        assert_eq!(decoded[1].payload, b"result bytes");
        assert_eq!(decoded[1].program, "/bin/cat");
        assert_eq!(decoded[1].arg_file_names, vec!["in1.txt".to_string()]);
    }

    #[test]
    fn test_deterministic_encoding() {
        let tasks = vec![sample_task()];
        assert_eq!(encode_tasks(&tasks).unwrap(), encode_tasks(&tasks).unwrap());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let body = bincode::serialize(&vec![sample_task()]).unwrap();
        let mut frame = vec![99u8];
        frame.extend_from_slice(&body);
        let wire = compress(&frame).unwrap();

        match decode_tasks(&wire) {
            Err(CodecError::UnsupportedVersion(99)) => {}
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode_tasks(b"not a zlib stream").is_err());
        let empty = compress(b"").unwrap();
        assert!(matches!(decode_tasks(&empty), Err(CodecError::EmptyFrame)));
    }

    #[test]
    fn test_file_bytes_round_trip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let wire = compress(&data).unwrap();
        assert_eq!(decompress(&wire).unwrap(), data);
    }
}
