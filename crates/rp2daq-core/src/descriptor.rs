//! Typed catalogue of the firmware's command and report descriptors
//!
//! One opcode always pairs one command with one report. The catalogue is
//! built once at startup by [`crate::parser`] and shared immutably by the
//! codec, the receive pipeline and the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Integer width of a scalar descriptor field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    W8,
    W16,
    W32,
    W64,
}

impl FieldWidth {
    /// Width in bytes on the wire
    pub fn bytes(self) -> usize {
        match self {
            FieldWidth::W8 => 1,
            FieldWidth::W16 => 2,
            FieldWidth::W32 => 4,
            FieldWidth::W64 => 8,
        }
    }

    /// Parse the bit count from a C integer type (`8`, `16`, `32`, `64`)
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(FieldWidth::W8),
            16 => Some(FieldWidth::W16),
            32 => Some(FieldWidth::W32),
            64 => Some(FieldWidth::W64),
            _ => None,
        }
    }
}

/// One scalar field of a command argument struct or report header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name (snake_case, as written in the firmware source)
    pub name: String,
    /// True for `intN_t`, false for `uintN_t`
    pub signed: bool,
    /// Wire width
    pub width: FieldWidth,
    /// Declared minimum, from a `min=` annotation
    pub min: Option<i128>,
    /// Declared maximum, from a `max=` annotation
    pub max: Option<i128>,
    /// Declared default, from a `default=` annotation
    pub default: Option<i128>,
    /// Free-text comment trailing the declaration
    pub comment: String,
}

impl FieldDescriptor {
    /// Name of the C type, for error messages
    pub fn type_name(&self) -> &'static str {
        match (self.signed, self.width) {
            (false, FieldWidth::W8) => "uint8",
            (false, FieldWidth::W16) => "uint16",
            (false, FieldWidth::W32) => "uint32",
            (false, FieldWidth::W64) => "uint64",
            (true, FieldWidth::W8) => "int8",
            (true, FieldWidth::W16) => "int16",
            (true, FieldWidth::W32) => "int32",
            (true, FieldWidth::W64) => "int64",
        }
    }

    /// Range representable by the field's width and signedness
    pub fn representable(&self) -> (i128, i128) {
        let bits = (self.width.bytes() * 8) as u32;
        if self.signed {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }

    /// Validate a value against the width and any `min`/`max` annotations
    pub fn check(&self, value: i128) -> Result<()> {
        let (lo, hi) = self.representable();
        if value < lo || value > hi {
            return Err(Error::WidthOverflow {
                field: self.name.clone(),
                value,
                width: self.type_name(),
            });
        }
        if let Some(min) = self.min {
            if value < min {
                return Err(Error::BelowMinimum {
                    field: self.name.clone(),
                    value,
                    min,
                });
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Err(Error::AboveMaximum {
                    field: self.name.clone(),
                    value,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Descriptor of one host-to-device command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Command name from the `message_table`
    pub name: String,
    /// Opcode assigned by table position
    pub opcode: u8,
    /// Argument fields in wire order
    pub fields: Vec<FieldDescriptor>,
}

impl CommandDescriptor {
    /// Sum of the argument widths in bytes
    pub fn args_len(&self) -> usize {
        self.fields.iter().map(|f| f.width.bytes()).sum()
    }

    /// Look up an argument field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Descriptor of one device-to-host report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDescriptor {
    /// Matching command name
    pub name: String,
    /// Opcode shared with the command
    pub opcode: u8,
    /// Header fields in wire order; the first is always `report_code`
    pub fields: Vec<FieldDescriptor>,
    /// True when the header carries `data_count` and `data_bitwidth`,
    /// i.e. a variable-length sample payload follows
    pub has_payload: bool,
}

impl ReportDescriptor {
    /// Header width in bytes, opcode byte included
    pub fn header_len(&self) -> usize {
        self.fields.iter().map(|f| f.width.bytes()).sum()
    }

    /// Index of a header field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Immutable catalogue of every command/report pair the firmware offers
#[derive(Debug)]
pub struct Catalogue {
    version: u32,
    commands: Vec<CommandDescriptor>,
    reports: Vec<Arc<ReportDescriptor>>,
    by_name: HashMap<String, u8>,
}

impl Catalogue {
    /// Build and validate a catalogue.
    ///
    /// The parser hands commands and reports in table order; this checks
    /// the structural invariants the rest of the runtime relies on:
    /// dense opcodes, one report per command with the same name, a
    /// non-empty report header starting with a `uint8` report code.
    pub fn new(
        version: u32,
        commands: Vec<CommandDescriptor>,
        reports: Vec<ReportDescriptor>,
    ) -> Result<Self> {
        if commands.len() != reports.len() {
            return Err(Error::descriptor(format!(
                "{} commands but {} reports",
                commands.len(),
                reports.len()
            )));
        }
        if commands.len() > u8::MAX as usize + 1 {
            return Err(Error::descriptor("more than 256 opcodes"));
        }

        let mut by_name = HashMap::new();
        for (i, (cmd, rep)) in commands.iter().zip(&reports).enumerate() {
            let opcode = i as u8;
            if cmd.opcode != opcode || rep.opcode != opcode {
                return Err(Error::descriptor(format!(
                    "opcode gap at {} (command \"{}\")",
                    i, cmd.name
                )));
            }
            if cmd.name != rep.name {
                return Err(Error::descriptor(format!(
                    "command \"{}\" paired with report \"{}\"",
                    cmd.name, rep.name
                )));
            }
            // the frame length byte counts 2 + args and must stay a u8
            if cmd.args_len() > u8::MAX as usize - 2 {
                return Err(Error::descriptor(format!(
                    "arguments of \"{}\" exceed one command frame",
                    cmd.name
                )));
            }
            match rep.fields.first() {
                Some(first) if first.width == FieldWidth::W8 && !first.signed => {}
                Some(_) => {
                    return Err(Error::descriptor(format!(
                        "report \"{}\" does not start with a uint8 report code",
                        rep.name
                    )))
                }
                None => {
                    return Err(Error::descriptor(format!(
                        "report \"{}\" has an empty header",
                        rep.name
                    )))
                }
            }
            if rep.has_payload
                && (rep.field_index("data_count").is_none()
                    || rep.field_index("data_bitwidth").is_none())
            {
                return Err(Error::descriptor(format!(
                    "report \"{}\" flagged for payload without count/bitwidth fields",
                    rep.name
                )));
            }
            if by_name.insert(cmd.name.clone(), opcode).is_some() {
                return Err(Error::descriptor(format!(
                    "duplicate command \"{}\"",
                    cmd.name
                )));
            }
        }

        Ok(Self {
            version,
            commands,
            reports: reports.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    /// Firmware version date stamp parsed from the descriptor source
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of opcodes
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when the catalogue holds no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Command descriptor by opcode
    pub fn command(&self, opcode: u8) -> Option<&CommandDescriptor> {
        self.commands.get(opcode as usize)
    }

    /// Command descriptor by name
    pub fn command_by_name(&self, name: &str) -> Option<&CommandDescriptor> {
        self.by_name.get(name).map(|&op| &self.commands[op as usize])
    }

    /// Report descriptor by opcode
    pub fn report(&self, opcode: u8) -> Option<&Arc<ReportDescriptor>> {
        self.reports.get(opcode as usize)
    }

    /// Iterate over commands in opcode order
    pub fn commands(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.iter()
    }

    /// Iterate over reports in opcode order
    pub fn reports(&self) -> impl Iterator<Item = &Arc<ReportDescriptor>> {
        self.reports.iter()
    }
}
