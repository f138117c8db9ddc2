//! Line-oriented trace parsing.
//!
//! A trace is a text file with one event per line, fields separated by `:`:
//!
//! | Line | Event |
//! |------|-------|
//! | `r:<rax>:<rbx>:...:<r15>` | [`TraceEvent::RegisterSync`], 16 hex values |
//! | `mr:<addr>:<size>:<value>` | [`TraceEvent::MemorySync`], hex address/value, decimal size |
//! | `i:<addr>:<size>:<bytes>` | [`TraceEvent::Instruction`], hex address and byte string |
//!
//! Lines with any other tag, including empty lines, are skipped.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{
    engine::{GpRegister, RegisterFile},
    trace::TraceEvent,
    Error, Result,
};

/// Lazy, single-pass reader producing [`TraceEvent`]s in file order.
///
/// The reader is an [`Iterator`] over `Result<TraceEvent>`. The first error ends the
/// sequence: every later call to `next` returns `None`.
///
/// # Examples
///
/// ```rust
/// use vmscope::trace::{TraceEvent, TraceReader};
///
/// let text = "mr:7ffe0000:4:deadbeef\ni:401000:1:90\n";
/// let events = TraceReader::new(text.as_bytes()).collect::<vmscope::Result<Vec<_>>>()?;
/// assert_eq!(events.len(), 2);
/// assert!(matches!(events[1], TraceEvent::Instruction { address: 0x401000, .. }));
/// # Ok::<(), vmscope::Error>(())
/// ```
pub struct TraceReader<R> {
    input: R,
    line: usize,
    buffer: String,
    done: bool,
}

impl TraceReader<BufReader<File>> {
    /// Opens a trace file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be opened.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> TraceReader<R> {
    /// Creates a reader over buffered input.
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buffer: String::new(),
            done: false,
        }
    }

    /// 1-based number of the last line read.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    fn fail<T>(&mut self, message: impl Into<String>) -> Option<Result<T>> {
        self.done = true;
        Some(Err(Error::TraceFormat {
            line: self.line,
            message: message.into(),
        }))
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buffer.clear();
            match self.input.read_line(&mut self.buffer) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => self.line += 1,
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::FileError(e)));
                }
            }

            match parse_line(self.line, self.buffer.trim_end_matches(['\r', '\n'])) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(message) => return self.fail(message),
            }
        }
        None
    }
}

impl<R: BufRead> std::iter::FusedIterator for TraceReader<R> {}

/// Parses one line; `Ok(None)` for lines that carry no event.
fn parse_line(line: usize, text: &str) -> std::result::Result<Option<TraceEvent>, String> {
    let mut fields = text.split(':');
    let tag = fields.next().unwrap_or_default().trim();
    let fields: Vec<&str> = fields.collect();

    match tag {
        "r" => parse_registers(&fields).map(Some),
        "mr" => parse_memory(&fields).map(Some),
        "i" => parse_instruction(line, &fields).map(Some),
        _ => Ok(None),
    }
}

fn parse_registers(fields: &[&str]) -> std::result::Result<TraceEvent, String> {
    if fields.len() != GpRegister::COUNT {
        return Err(format!(
            "register line needs {} values, found {}",
            GpRegister::COUNT,
            fields.len()
        ));
    }

    let mut values = [0u64; GpRegister::COUNT];
    for (slot, (reg, field)) in values
        .iter_mut()
        .zip(GpRegister::CANONICAL.iter().zip(fields))
    {
        *slot = parse_hex(field).map_err(|e| format!("{reg}: {e}"))?;
    }
    Ok(TraceEvent::RegisterSync(RegisterFile::from_array(values)))
}

fn parse_memory(fields: &[&str]) -> std::result::Result<TraceEvent, String> {
    let [address, size, value] = fields else {
        return Err(format!(
            "memory line needs address, size and value, found {} fields",
            fields.len()
        ));
    };

    let address = parse_hex(address).map_err(|e| format!("address: {e}"))?;
    let size = parse_size(size)?;
    if !(1..=8).contains(&size) {
        return Err(format!("memory size must be 1..=8 bytes, found {size}"));
    }
    let value = parse_hex(value).map_err(|e| format!("value: {e}"))?;
    if size < 8 && value >> (size * 8) != 0 {
        return Err(format!("value 0x{value:x} does not fit in {size} bytes"));
    }

    Ok(TraceEvent::MemorySync {
        address,
        size,
        value,
    })
}

fn parse_instruction(line: usize, fields: &[&str]) -> std::result::Result<TraceEvent, String> {
    let [address, size, data] = fields else {
        return Err(format!(
            "instruction line needs address, size and bytes, found {} fields",
            fields.len()
        ));
    };

    let address = parse_hex(address).map_err(|e| format!("address: {e}"))?;
    let size = parse_size(size)?;
    let bytes = parse_bytes(data.trim())?;

    if size != bytes.len() {
        log::warn!(
            "Line {line}: instruction at 0x{address:x} declares {size} bytes but carries {}",
            bytes.len()
        );
    }

    Ok(TraceEvent::Instruction { address, bytes })
}

fn parse_size(field: &str) -> std::result::Result<usize, String> {
    let field = field.trim();
    field
        .parse::<usize>()
        .map_err(|_| format!("invalid size '{field}'"))
}

fn parse_hex(field: &str) -> std::result::Result<u64, String> {
    let field = field.trim();
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    if digits.is_empty() {
        return Err("empty hex value".to_string());
    }
    u64::from_str_radix(digits, 16).map_err(|_| format!("invalid hex value '{field}'"))
}

fn parse_bytes(data: &str) -> std::result::Result<Vec<u8>, String> {
    if data.is_empty() {
        return Err("empty instruction bytes".to_string());
    }
    if data.len() % 2 != 0 {
        return Err(format!("odd-length byte string '{data}'"));
    }

    data.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| format!("invalid byte string '{data}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str) -> Vec<Result<TraceEvent>> {
        TraceReader::new(text.as_bytes()).collect()
    }

    #[test]
    fn parses_all_event_kinds() -> Result<()> {
        let text = "r:2a:0:0:0:0:0:0:0:0:0:0:0:0:0:0:0\n\
                    mr:0x7ffe1000:8:1122334455667788\n\
                    i:401000:3:4889f8\n";
        let events = TraceReader::new(text.as_bytes()).collect::<Result<Vec<_>>>()?;

        assert_eq!(events.len(), 3);
        match &events[0] {
            TraceEvent::RegisterSync(values) => {
                assert_eq!(values[GpRegister::Rax], 0x2a);
                assert_eq!(values[GpRegister::R15], 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            events[1],
            TraceEvent::MemorySync {
                address: 0x7ffe_1000,
                size: 8,
                value: 0x1122_3344_5566_7788
            }
        );
        assert_eq!(
            events[2],
            TraceEvent::Instruction {
                address: 0x401000,
                bytes: vec![0x48, 0x89, 0xf8]
            }
        );
        Ok(())
    }

    #[test]
    fn skips_unknown_and_empty_lines() {
        let events = read("\n# comment\nfoo:1:2\r\ni:10:1:90\r\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[test]
    fn tolerates_whitespace_and_size_mismatch() -> Result<()> {
        let events = read("i: 0X10 : 2 : 90 \n");
        assert_eq!(
            events.into_iter().collect::<Result<Vec<_>>>()?,
            vec![TraceEvent::Instruction {
                address: 0x10,
                bytes: vec![0x90]
            }]
        );
        Ok(())
    }

    #[test]
    fn errors_name_the_line() {
        let events = read("i:10:1:90\nr:1:2:3\ni:11:1:90\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            Err(Error::TraceFormat { line: 2, .. })
        ));
    }

    #[test]
    fn rejects_malformed_fields() {
        let cases = [
            "mr:10:9:0",
            "mr:10:0:0",
            "mr:10:1:100",
            "mr:10:four:0",
            "mr:zz:1:0",
            "mr:10:1",
            "i:10:1:",
            "i:10:1:909",
            "i:10:1:gg",
            "i:10:x:90",
        ];
        for case in cases {
            let events = read(case);
            assert!(
                matches!(events.as_slice(), [Err(Error::TraceFormat { line: 1, .. })]),
                "{case} should be rejected"
            );
        }
    }

    #[test]
    fn reader_is_fused_after_error() {
        let mut reader = TraceReader::new("mr:1:2:3:4\ni:10:1:90\n".as_bytes());
        assert!(matches!(reader.next(), Some(Err(_))));
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
        assert_eq!(reader.line(), 1);
    }

    #[test]
    fn display_round_trips() -> Result<()> {
        let line = "mr:1000:2:beef";
        let event = read(line).remove(0)?;
        assert_eq!(event.to_string(), line);
        assert_eq!(event.tag(), "mr");
        Ok(())
    }
}
