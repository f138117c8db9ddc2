//! Trace file parsing through the public API.

use std::io::Write;

use tempfile::NamedTempFile;
use vmscope::{
    engine::GpRegister,
    trace::{TraceEvent, TraceReader, TraceSummary},
    Error, Result,
};

fn trace_file(text: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[test]
fn reads_all_event_kinds_from_file() -> Result<()> {
    let file = trace_file(
        "r:1:2:3:4:5:6:7:8:9:a:b:c:d:e:f:10\n\
         mr:0x7ffe0000:8:0xdeadbeef\n\
         i:140001000:3:4889f8\n\
         junk that is skipped\n\
         i:140001003:1:c3\n",
    )?;

    let events: Vec<TraceEvent> = TraceReader::from_path(file.path())?.collect::<Result<_>>()?;
    assert_eq!(events.len(), 4);

    let TraceEvent::RegisterSync(registers) = &events[0] else {
        panic!("expected a register snapshot, got {}", events[0]);
    };
    assert_eq!(registers.as_array()[GpRegister::Rdi.index()], 5);
    assert_eq!(registers.as_array()[GpRegister::R15.index()], 0x10);

    assert_eq!(
        events[1],
        TraceEvent::MemorySync {
            address: 0x7ffe_0000,
            size: 8,
            value: 0xdead_beef
        }
    );
    assert_eq!(
        events[3],
        TraceEvent::Instruction {
            address: 0x1_4000_1003,
            bytes: vec![0xc3]
        }
    );
    Ok(())
}

#[test]
fn summary_of_file() -> Result<()> {
    let file = trace_file(
        "r:0:0:0:0:0:0:0:0:0:0:0:0:0:0:0:0\n\
         i:2000:1:90\n\
         i:1000:1:90\n\
         i:2000:1:90\n\
         mr:10:1:1\n",
    )?;

    let summary = TraceSummary::from_path(file.path())?;
    assert_eq!(summary.instructions, 3);
    assert_eq!(summary.addresses.len(), 2);
    assert_eq!(summary.register_syncs, 1);
    assert_eq!(summary.memory_syncs, 1);
    assert_eq!(summary.address_range(), Some((0x1000, 0x2000)));
    Ok(())
}

#[test]
fn parse_errors_carry_line_numbers() -> Result<()> {
    let file = trace_file("i:1000:1:90\nr:0:0\n")?;
    let mut reader = TraceReader::from_path(file.path())?;

    assert!(matches!(reader.next(), Some(Ok(_))));
    assert!(matches!(
        reader.next(),
        Some(Err(Error::TraceFormat { line: 2, .. }))
    ));
    assert!(reader.next().is_none());
    Ok(())
}
