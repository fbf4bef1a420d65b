//! 64-byte command packets
//!
//! Every control-plane mutation (parameter set, gate, patch op) is carried in
//! a fixed 64-byte record so that command rings can hold plain byte slots and
//! the worker-side decoder never allocates.
//!
//! Layout:
//! ```text
//! byte  0        operation tag (0=set, 1=gate, 2=patch)
//! byte  1        data-type tag (0=float, 1=int, 2=bool)
//! bytes 2..16    reserved (zero)
//! bytes 16..32   target module id, ASCII [a-z0-9_], null-padded
//! bytes 32..48   parameter name, ASCII [a-z0-9_], null-padded
//! bytes 48..56   payload (f64 / i64 / bool as i64, little endian)
//! bytes 56..64   reserved (zero)
//! ```

use thiserror::Error;

/// Size of one command packet in bytes
pub const COMMAND_PACKET_SIZE: usize = 64;

/// Maximum length of module ids and parameter names
pub const MAX_IDENT_LEN: usize = 16;

const MODULE_OFFSET: usize = 16;
const PARAM_OFFSET: usize = 32;
const VALUE_OFFSET: usize = 48;

/// Command operation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandOp {
    /// Set a named parameter on the target module
    Set = 0,
    /// Gate the target module on or off
    Gate = 1,
    /// Patch mutation (reserved for router-building flows)
    Patch = 2,
}

impl CommandOp {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Set),
            1 => Some(Self::Gate),
            2 => Some(Self::Patch),
            _ => None,
        }
    }
}

/// Payload value carried by a command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandValue {
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl CommandValue {
    fn type_tag(self) -> u8 {
        match self {
            Self::Float(_) => 0,
            Self::Int(_) => 1,
            Self::Bool(_) => 2,
        }
    }

    /// Coerce to f64 (bools map to 0.0 / 1.0)
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Float(v) => v,
            Self::Int(v) => v as f64,
            Self::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Truthiness (non-zero is on)
    #[inline]
    pub fn as_bool(self) -> bool {
        match self {
            Self::Float(v) => v != 0.0,
            Self::Int(v) => v != 0,
            Self::Bool(v) => v,
        }
    }
}

/// Command codec errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("identifier is empty or longer than {MAX_IDENT_LEN} bytes")]
    IdentLength,

    #[error("identifier contains bytes outside [a-z0-9_]")]
    IdentCharset,

    #[error("unknown operation tag: {0}")]
    UnknownOp(u8),

    #[error("unknown data-type tag: {0}")]
    UnknownType(u8),
}

/// A fixed 64-byte command packet
#[derive(Clone, Copy)]
pub struct CommandPacket([u8; COMMAND_PACKET_SIZE]);

/// Decoded view of a packet, borrowing its identifier bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedCommand<'a> {
    pub op: CommandOp,
    pub module: &'a str,
    pub param: &'a str,
    pub value: CommandValue,
}

/// True iff `ident` is non-empty, at most [`MAX_IDENT_LEN`] bytes, and every
/// byte is in [a-z0-9_]
pub fn is_valid_ident(ident: &str) -> bool {
    !ident.is_empty()
        && ident.len() <= MAX_IDENT_LEN
        && ident
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl CommandPacket {
    /// Encode a command. Identifiers are validated against the wire charset.
    pub fn encode(
        op: CommandOp,
        module: &str,
        param: &str,
        value: CommandValue,
    ) -> Result<Self, CommandError> {
        for ident in [module, param] {
            if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
                return Err(CommandError::IdentLength);
            }
            if !is_valid_ident(ident) {
                return Err(CommandError::IdentCharset);
            }
        }

        let mut bytes = [0u8; COMMAND_PACKET_SIZE];
        bytes[0] = op as u8;
        bytes[1] = value.type_tag();
        bytes[MODULE_OFFSET..MODULE_OFFSET + module.len()].copy_from_slice(module.as_bytes());
        bytes[PARAM_OFFSET..PARAM_OFFSET + param.len()].copy_from_slice(param.as_bytes());

        let payload: [u8; 8] = match value {
            CommandValue::Float(v) => v.to_le_bytes(),
            CommandValue::Int(v) => v.to_le_bytes(),
            CommandValue::Bool(v) => (v as i64).to_le_bytes(),
        };
        bytes[VALUE_OFFSET..VALUE_OFFSET + 8].copy_from_slice(&payload);

        Ok(Self(bytes))
    }

    /// Shorthand: `set <module>.<param> = <value>`
    pub fn set_float(module: &str, param: &str, value: f64) -> Result<Self, CommandError> {
        Self::encode(CommandOp::Set, module, param, CommandValue::Float(value))
    }

    /// Shorthand: gate a module on or off
    pub fn gate(module: &str, on: bool) -> Result<Self, CommandError> {
        Self::encode(CommandOp::Gate, module, "gate", CommandValue::Bool(on))
    }

    /// Decode the packet. Allocation-free: identifier strings borrow the
    /// packet's own bytes. Malformed packets (bad tags, out-of-charset ids)
    /// yield an error the receiver counts and drops.
    pub fn decode(&self) -> Result<DecodedCommand<'_>, CommandError> {
        let op = CommandOp::from_u8(self.0[0]).ok_or(CommandError::UnknownOp(self.0[0]))?;

        let module = decode_ident(&self.0[MODULE_OFFSET..MODULE_OFFSET + MAX_IDENT_LEN])?;
        let param = decode_ident(&self.0[PARAM_OFFSET..PARAM_OFFSET + MAX_IDENT_LEN])?;

        let mut payload = [0u8; 8];
        payload.copy_from_slice(&self.0[VALUE_OFFSET..VALUE_OFFSET + 8]);
        let value = match self.0[1] {
            0 => CommandValue::Float(f64::from_le_bytes(payload)),
            1 => CommandValue::Int(i64::from_le_bytes(payload)),
            2 => CommandValue::Bool(i64::from_le_bytes(payload) != 0),
            other => return Err(CommandError::UnknownType(other)),
        };

        Ok(DecodedCommand {
            op,
            module,
            param,
            value,
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; COMMAND_PACKET_SIZE] {
        &self.0
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; COMMAND_PACKET_SIZE]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for CommandPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.decode() {
            Ok(cmd) => write!(
                f,
                "CommandPacket({:?} {}.{} = {:?})",
                cmd.op, cmd.module, cmd.param, cmd.value
            ),
            Err(e) => write!(f, "CommandPacket(<invalid: {e}>)"),
        }
    }
}

/// Extract a null-padded identifier and validate the wire charset
fn decode_ident(field: &[u8]) -> Result<&str, CommandError> {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let raw = &field[..len];
    if raw.is_empty() {
        return Err(CommandError::IdentLength);
    }
    if !raw
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(CommandError::IdentCharset);
    }
    // Charset check guarantees ASCII, so UTF-8 validation cannot fail.
    Ok(std::str::from_utf8(raw).expect("charset-checked ascii"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_float() {
        let pkt = CommandPacket::set_float("osc", "freq", 440.0).unwrap();
        let cmd = pkt.decode().unwrap();
        assert_eq!(cmd.op, CommandOp::Set);
        assert_eq!(cmd.module, "osc");
        assert_eq!(cmd.param, "freq");
        assert_eq!(cmd.value, CommandValue::Float(440.0));
    }

    #[test]
    fn test_roundtrip_gate() {
        let pkt = CommandPacket::gate("env", true).unwrap();
        let cmd = pkt.decode().unwrap();
        assert_eq!(cmd.op, CommandOp::Gate);
        assert_eq!(cmd.module, "env");
        assert_eq!(cmd.param, "gate");
        assert!(cmd.value.as_bool());
    }

    #[test]
    fn test_roundtrip_int() {
        let pkt = CommandPacket::encode(
            CommandOp::Set,
            "filter",
            "mode",
            CommandValue::Int(2),
        )
        .unwrap();
        let cmd = pkt.decode().unwrap();
        assert_eq!(cmd.value, CommandValue::Int(2));
        assert_eq!(cmd.value.as_f64(), 2.0);
    }

    #[test]
    fn test_packet_is_64_bytes() {
        let pkt = CommandPacket::set_float("a", "b", 0.0).unwrap();
        assert_eq!(pkt.as_bytes().len(), COMMAND_PACKET_SIZE);
        assert_eq!(std::mem::size_of::<CommandPacket>(), COMMAND_PACKET_SIZE);
    }

    #[test]
    fn test_ident_validation() {
        assert!(CommandPacket::set_float("Osc", "freq", 1.0).is_err());
        assert!(CommandPacket::set_float("", "freq", 1.0).is_err());
        assert!(CommandPacket::set_float("osc", "a_very_long_param_name", 1.0).is_err());
        assert!(CommandPacket::set_float("osc_1", "freq", 1.0).is_ok());
        assert!(is_valid_ident("biquad_2"));
        assert!(!is_valid_ident("no-dashes"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut bytes = [0u8; COMMAND_PACKET_SIZE];
        bytes[0] = 7; // unknown op
        assert_eq!(
            CommandPacket::from_bytes(bytes).decode(),
            Err(CommandError::UnknownOp(7))
        );

        let mut bytes = [0u8; COMMAND_PACKET_SIZE];
        bytes[0] = 0;
        bytes[1] = 9; // unknown type
        bytes[16] = b'a';
        bytes[32] = b'b';
        assert_eq!(
            CommandPacket::from_bytes(bytes).decode(),
            Err(CommandError::UnknownType(9))
        );

        let mut bytes = [0u8; COMMAND_PACKET_SIZE];
        bytes[16] = 0xFF; // out-of-charset module id
        bytes[32] = b'p';
        assert_eq!(
            CommandPacket::from_bytes(bytes).decode(),
            Err(CommandError::IdentCharset)
        );
    }
}
