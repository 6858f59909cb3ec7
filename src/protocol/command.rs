use crate::error::CommandError;

/// Largest text chunk carried by one display text frame
pub const DISPLAY_TEXT_CHUNK_LEN: usize = 18;
/// The chunk sequence number is a single byte
pub const MAX_DISPLAY_TEXT_LEN: usize = DISPLAY_TEXT_CHUNK_LEN * 256;

/// Written to the trips characteristic to start a history transfer
const TRIP_HISTORY_REQUEST: u8 = 1;

/// Commands written to the operation command characteristic
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationCommand {
    MarkTrip,
    /// Sent before and after a run of text chunks
    DisplayTextBoundary,
    DisplayTextChunk { seq: u8, text: Vec<u8> },
}

impl OperationCommand {
    const DISPLAY_TEXT_CHUNK: u8 = 4;
    const MARK_TRIP: u8 = 9;
    const DISPLAY_TEXT_BOUNDARY: u8 = 12;

    pub fn opcode(&self) -> u8 {
        match self {
            Self::MarkTrip => Self::MARK_TRIP,
            Self::DisplayTextBoundary => Self::DISPLAY_TEXT_BOUNDARY,
            Self::DisplayTextChunk { .. } => Self::DISPLAY_TEXT_CHUNK,
        }
    }

    /// Opcode byte followed by the payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.opcode()];
        if let Self::DisplayTextChunk { seq, text } = self {
            out.push(*seq);
            out.extend_from_slice(text);
        }
        out
    }
}

/// Build the command sequence that shows `msg` on the scooter's display
///
/// The UTF-8 bytes are split into chunks of at most 18 bytes, each prefixed
/// with its 0-based sequence number, and bracketed by boundary markers.
/// Chunks may split a multi-byte character; the display reassembles bytes.
pub fn display_text(msg: &str) -> Result<Vec<OperationCommand>, CommandError> {
    let bytes = msg.as_bytes();
    if bytes.len() > MAX_DISPLAY_TEXT_LEN {
        return Err(CommandError::TextTooLong {
            len: bytes.len(),
            max: MAX_DISPLAY_TEXT_LEN,
        });
    }

    let mut commands = Vec::with_capacity(bytes.len() / DISPLAY_TEXT_CHUNK_LEN + 3);
    commands.push(OperationCommand::DisplayTextBoundary);
    commands.extend(
        bytes
            .chunks(DISPLAY_TEXT_CHUNK_LEN)
            .zip(0u8..=u8::MAX)
            .map(|(chunk, seq)| OperationCommand::DisplayTextChunk {
                seq,
                text: chunk.to_vec(),
            }),
    );
    commands.push(OperationCommand::DisplayTextBoundary);
    Ok(commands)
}

pub fn trip_history_request() -> Vec<u8> {
    vec![TRIP_HISTORY_REQUEST]
}
