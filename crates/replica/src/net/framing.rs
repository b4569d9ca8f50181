use std::io::{self, Read};

/// Upper bound on a single framed message.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message of {0} bytes exceeds the {max} byte limit", max = MAX_MESSAGE_SIZE)]
    TooLarge(usize),
}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

/// Prefixes `message` with its length as a big-endian u32.
pub fn encode_frame(message: &[u8]) -> Result<Vec<u8>, FrameError> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(message.len()));
    }

    let mut framed = Vec::with_capacity(LENGTH_PREFIX + message.len());
    framed.extend_from_slice(&(message.len() as u32).to_be_bytes());
    framed.extend_from_slice(message);
    Ok(framed)
}

/// Reassembles length-prefixed frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(prefix) = self.buffer.first_chunk::<LENGTH_PREFIX>() else {
            return Ok(None);
        };

        let len = u32::from_be_bytes(*prefix) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(FrameError::TooLarge(len));
        }
        if self.buffer.len() < LENGTH_PREFIX + len {
            return Ok(None);
        }

        let frame = self.buffer[LENGTH_PREFIX..LENGTH_PREFIX + len].to_vec();
        self.buffer.drain(..LENGTH_PREFIX + len);
        Ok(Some(frame))
    }
}

/// Reads frames until EOF, handing each complete message to `on_message`.
pub fn read_frames<R: Read>(reader: &mut R, mut on_message: impl FnMut(Vec<u8>)) -> io::Result<()> {
    let mut frames = FrameReader::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        frames.push(&chunk[..read]);
        while let Some(frame) = frames.next_frame()? {
            on_message(frame);
        }
    }
}
