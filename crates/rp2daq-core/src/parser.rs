//! Firmware descriptor-source parser
//!
//! The rp2daq firmware is the single source of truth for its binary
//! message interface. This module scans the firmware C sources for:
//!
//! 1. the `message_table` brace block, which assigns opcodes by position
//!    (each entry pairs `<name>` with `<name>_report`),
//! 2. the packed argument struct opening each `void <name>()` handler,
//! 3. the `} <name>_report` struct describing the report header,
//! 4. the `FIRMWARE_VERSION` date stamp in `rp2daq.h`.
//!
//! Brace matching counts raw `{`/`}` characters and does not understand
//! string literals or preprocessor conditionals; the firmware sources
//! are written to stay within that subset.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::descriptor::{Catalogue, CommandDescriptor, FieldDescriptor, FieldWidth, ReportDescriptor};
use crate::error::{Error, Result};

/// Root source file holding the `message_table`
const ROOT_SOURCE: &str = "rp2daq.c";
/// Header carrying the `FIRMWARE_VERSION` define
const VERSION_HEADER: &str = "rp2daq.h";
/// Directory of per-subsystem handler sources
const INCLUDE_DIR: &str = "include";

fn field_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(u?)int(8|16|32|64)_t\s+([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s*;?([^\n]*)")
            .unwrap()
    })
}

fn attrib_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)=(-?\d+)$").unwrap())
}

/// Parse the firmware source tree rooted at `dir`.
///
/// Reads `rp2daq.c`, concatenates every `include/*.c` in file-name
/// order, and extracts the firmware version from `rp2daq.h`.
pub fn parse_firmware(dir: &Path) -> Result<Catalogue> {
    let source = gather_source(dir)?;
    let header = read_text(&dir.join(VERSION_HEADER))?;
    let version = firmware_version(&header)?;
    parse_source(&source, version)
}

/// Concatenate the root source with every include file, in name order
pub fn gather_source(dir: &Path) -> Result<String> {
    let mut source = read_text(&dir.join(ROOT_SOURCE))?;

    let include_dir = dir.join(INCLUDE_DIR);
    let mut includes: Vec<_> = fs::read_dir(&include_dir)
        .map_err(|e| Error::descriptor(format!("cannot list {}: {}", include_dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "c"))
        .collect();
    includes.sort();

    for path in includes {
        source.push('\n');
        source.push_str(&read_text(&path)?);
    }
    Ok(source)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::descriptor(format!("cannot read {}: {}", path.display(), e)))
}

/// Extract the six-digit date stamp from the `FIRMWARE_VERSION` define
pub fn firmware_version(header: &str) -> Result<u32> {
    let re = Regex::new(r#"FIRMWARE_VERSION\s*\{?\s*"rp2daq_(\d{6})"#).unwrap();
    let caps = re
        .captures(header)
        .ok_or_else(|| Error::descriptor("no FIRMWARE_VERSION define in rp2daq.h"))?;
    caps[1]
        .parse()
        .map_err(|_| Error::descriptor("malformed FIRMWARE_VERSION date"))
}

/// Parse concatenated firmware source text into a catalogue
pub fn parse_source(source: &str, version: u32) -> Result<Catalogue> {
    let names = command_names(source)?;
    log::debug!("descriptor table lists {} commands", names.len());

    let mut commands = Vec::with_capacity(names.len());
    let mut reports = Vec::with_capacity(names.len());
    for (opcode, name) in names.iter().enumerate() {
        let opcode = opcode as u8;
        commands.push(parse_command(source, name, opcode)?);
        reports.push(parse_report(source, name, opcode)?);
    }

    Catalogue::new(version, commands, reports)
}

/// Read the `message_table` and return the command names in opcode order
fn command_names(source: &str) -> Result<Vec<String>> {
    let table_re = Regex::new(r"message_descriptor\s+message_table").unwrap();
    let at = table_re
        .find(source)
        .ok_or_else(|| Error::descriptor("no message_table in firmware source"))?;
    let table = next_block(&source[at.end()..])
        .ok_or_else(|| Error::descriptor("message_table has no brace block"))?;
    let table = strip_comments(table);

    let word_re = Regex::new(r"\w+").unwrap();
    let tokens: Vec<&str> = word_re.find_iter(&table).map(|m| m.as_str()).collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return Err(Error::descriptor("message_table entries do not pair up"));
    }

    let mut names = Vec::with_capacity(tokens.len() / 2);
    for chunk in tokens.chunks(2) {
        let (cmd, rep) = (chunk[0], chunk[1]);
        if rep != format!("{cmd}_report") {
            return Err(Error::descriptor(format!(
                "message_table pairs \"{cmd}\" with \"{rep}\""
            )));
        }
        names.push(cmd.to_string());
    }
    Ok(names)
}

/// Locate `void <name>()` and parse the argument struct opening its body
fn parse_command(source: &str, name: &str, opcode: u8) -> Result<CommandDescriptor> {
    let handler_re = Regex::new(&format!(r"void\s+{}\s*\(\s*\)", regex::escape(name))).unwrap();
    let m = handler_re
        .find(source)
        .ok_or_else(|| Error::descriptor(format!("no handler void {name}() in firmware source")))?;

    let body = next_block(&source[m.end()..])
        .ok_or_else(|| Error::descriptor(format!("handler {name}() has no body")))?;
    let args = next_block(body)
        .ok_or_else(|| Error::descriptor(format!("handler {name}() has no argument struct")))?;

    Ok(CommandDescriptor {
        name: name.to_string(),
        opcode,
        fields: parse_struct_fields(args, false),
    })
}

/// Locate `} <name>_report` and parse the struct body preceding it
fn parse_report(source: &str, name: &str, opcode: u8) -> Result<ReportDescriptor> {
    let report_re = Regex::new(&format!(r"\}}\s*{}_report", regex::escape(name))).unwrap();
    let m = report_re
        .find(source)
        .ok_or_else(|| Error::descriptor(format!("no {name}_report struct in firmware source")))?;

    let body = prev_block(source, m.start())
        .ok_or_else(|| Error::descriptor(format!("{name}_report has no struct body")))?;

    let fields = parse_struct_fields(body, true);
    let has_payload = fields.iter().any(|f| f.name == "data_count")
        && fields.iter().any(|f| f.name == "data_bitwidth");

    Ok(ReportDescriptor {
        name: name.to_string(),
        opcode,
        fields,
        has_payload,
    })
}

/// Parse `(u)intN_t name[, name...]; // min=.. max=.. default=.. comment`
/// lines of a packed struct body.
///
/// Report field names drop their leading underscores (`_data_count`
/// becomes `data_count`); the firmware prefixes internals it fills in
/// itself.
fn parse_struct_fields(body: &str, strip_underscore: bool) -> Vec<FieldDescriptor> {
    // Fold `//` continuation lines back onto the declaration so their
    // annotations stay attached to the field.
    let joined = Regex::new(r"\n\s*//").unwrap().replace_all(body, " ");

    let mut fields = Vec::new();
    for caps in field_line_re().captures_iter(&joined) {
        let signed = caps[1].is_empty();
        let width = FieldWidth::from_bits(caps[2].parse().unwrap()).unwrap();
        let trailing = &caps[4];

        let mut min = None;
        let mut max = None;
        let mut default = None;
        let mut comment_words = Vec::new();
        for token in trailing.split_whitespace() {
            if let Some(attr) = attrib_re().captures(token) {
                let value: i128 = attr[2].parse().unwrap();
                match &attr[1] {
                    "min" => min = Some(value),
                    "max" => max = Some(value),
                    "default" => default = Some(value),
                    _ => comment_words.push(token),
                }
            } else if token != "//" && token != ";" {
                comment_words.push(token);
            }
        }

        for raw_name in caps[3].split(',') {
            let mut name = raw_name.trim();
            if strip_underscore {
                name = name.trim_start_matches('_');
            }
            fields.push(FieldDescriptor {
                name: name.to_string(),
                signed,
                width,
                min,
                max,
                default,
                comment: comment_words.join(" "),
            });
        }
    }
    fields
}

/// Remove `/* */` and `//` comments
fn strip_comments(text: &str) -> String {
    let block = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    let line = Regex::new(r"//[^\n]*").unwrap();
    line.replace_all(&block.replace_all(text, ""), "").into_owned()
}

/// Content of the first `{ ... }` block in `s`, nesting respected
fn next_block(s: &str) -> Option<&str> {
    let open = s.find('{')?;
    let mut depth = 1usize;
    for (i, c) in s[open + 1..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[open + 1..open + 1 + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Content of the `{ ... }` block whose closing brace sits at `close`
fn prev_block(s: &str, close: usize) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.get(close) != Some(&b'}') {
        return None;
    }
    let mut depth = 1usize;
    let mut i = close;
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b'}' => depth += 1,
            b'{' => {
                depth -= 1;
                if depth == 0 {
                    return s.get(i + 1..close);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        // command table: position assigns the opcode
        message_descriptor message_table[] = {
            {identify,      identify_report},
            {gpio_out,      gpio_out_report},  /* drives a pin */
            {internal_adc,  internal_adc_report},
        };

        void identify() {
            struct __attribute__((packed)) {
            } * args = (void *)(command_buffer + 2);

            struct __attribute__((packed)) {
                uint8_t report_code;
                uint16_t _data_count;
                uint8_t _data_bitwidth;
            } identify_report = {msg_identify, 30, 8};

            tx_report(&identify_report, sizeof(identify_report));
        }

        void gpio_out() {
            struct __attribute__((packed)) {
                uint8_t gpio;       // min=0 max=29 number of the output pin
                uint8_t value;      // min=0 max=1 default=0
            } * args = (void *)(command_buffer + 2);

            gpio_put(args->gpio, args->value);

            struct __attribute__((packed)) {
                uint8_t report_code;
            } gpio_out_report = {msg_gpio_out};
            tx_report(&gpio_out_report, sizeof(gpio_out_report));
        }

        void internal_adc() {
            struct __attribute__((packed)) {
                uint8_t channel_mask;          // default=1 bit field of ADC inputs
                uint16_t blocksize, blocks_to_send; // default=1000
                int16_t trigger_level;         // min=-2048 max=2047 default=0
            } * args = (void *)(command_buffer + 2);

            struct __attribute__((packed)) {
                uint8_t report_code;
                uint16_t _data_count;
                uint8_t _data_bitwidth;
                uint16_t blocks_to_send;
                // continuation comment for the next field:
                uint64_t start_time_us; us since boot
            } internal_adc_report;
            adc_arm(args);
        }
    "#;

    #[test]
    fn test_table_assigns_opcodes_by_position() {
        let cat = parse_source(SOURCE, 240715).unwrap();
        assert_eq!(cat.len(), 3);
        assert_eq!(cat.command_by_name("identify").unwrap().opcode, 0);
        assert_eq!(cat.command_by_name("gpio_out").unwrap().opcode, 1);
        assert_eq!(cat.command_by_name("internal_adc").unwrap().opcode, 2);
    }

    #[test]
    fn test_empty_argument_struct() {
        let cat = parse_source(SOURCE, 0).unwrap();
        assert!(cat.command_by_name("identify").unwrap().fields.is_empty());
    }

    #[test]
    fn test_field_annotations() {
        let cat = parse_source(SOURCE, 0).unwrap();
        let cmd = cat.command_by_name("gpio_out").unwrap();

        let gpio = cmd.field("gpio").unwrap();
        assert_eq!(gpio.min, Some(0));
        assert_eq!(gpio.max, Some(29));
        assert_eq!(gpio.default, None);
        assert_eq!(gpio.comment, "number of the output pin");

        let value = cmd.field("value").unwrap();
        assert_eq!(value.default, Some(0));
    }

    #[test]
    fn test_comma_separated_names_share_attributes() {
        let cat = parse_source(SOURCE, 0).unwrap();
        let cmd = cat.command_by_name("internal_adc").unwrap();
        assert_eq!(
            cmd.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            ["channel_mask", "blocksize", "blocks_to_send", "trigger_level"]
        );
        assert_eq!(cmd.field("blocksize").unwrap().default, Some(1000));
        assert_eq!(cmd.field("blocks_to_send").unwrap().default, Some(1000));
    }

    #[test]
    fn test_signed_field_with_negative_bound() {
        let cat = parse_source(SOURCE, 0).unwrap();
        let f = cat
            .command_by_name("internal_adc")
            .unwrap()
            .field("trigger_level")
            .unwrap();
        assert!(f.signed);
        assert_eq!(f.min, Some(-2048));
    }

    #[test]
    fn test_report_underscores_stripped_and_payload_flagged() {
        let cat = parse_source(SOURCE, 0).unwrap();
        let rep = cat.report(2).unwrap();
        assert!(rep.has_payload);
        assert_eq!(rep.fields[1].name, "data_count");
        assert_eq!(rep.fields[2].name, "data_bitwidth");
        // opcode + u16 + u8 + u16 + u64
        assert_eq!(rep.header_len(), 14);
    }

    #[test]
    fn test_continuation_comment_joined() {
        let cat = parse_source(SOURCE, 0).unwrap();
        let rep = cat.report(2).unwrap();
        let idx = rep.field_index("start_time_us").unwrap();
        assert_eq!(rep.fields[idx].comment, "us since boot");
    }

    #[test]
    fn test_missing_handler_is_fatal() {
        let source = "message_descriptor message_table { {ghost, ghost_report} };";
        let err = parse_source(source, 0).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_missing_report_is_fatal() {
        let source = r#"
            message_descriptor message_table { {lone, lone_report} };
            void lone() { struct { uint8_t x; } * args; }
        "#;
        let err = parse_source(source, 0).unwrap_err();
        assert!(err.to_string().contains("lone_report"));
    }

    #[test]
    fn test_unpaired_table_is_fatal() {
        let source = "message_descriptor message_table { {identify, gpio_out_report} };";
        assert!(parse_source(source, 0).is_err());
    }

    #[test]
    fn test_firmware_version() {
        let header = r#"
            #pragma once
            #define FIRMWARE_VERSION {"rp2daq_240715_"}
        "#;
        assert_eq!(firmware_version(header).unwrap(), 240715);
        assert!(firmware_version("#define OTHER 1").is_err());
    }

    #[test]
    fn test_block_extraction_nests() {
        assert_eq!(next_block("a{b{c}d}e{f}"), Some("b{c}d"));

        let s = "x {inner {deep} more} tail";
        let outer_close = s.rfind('}').unwrap();
        assert_eq!(prev_block(s, outer_close), Some("inner {deep} more"));
    }
}
