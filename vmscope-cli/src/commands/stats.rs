use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use vmscope::trace::TraceSummary;

use crate::{
    app::GlobalOptions,
    output::{hex, print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct TraceStats {
    pub instructions: usize,
    pub distinct_addresses: usize,
    pub register_syncs: usize,
    pub memory_syncs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_address: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

pub fn run(path: &Path, list_addresses: bool, opts: &GlobalOptions) -> anyhow::Result<()> {
    let summary = TraceSummary::from_path(path)
        .with_context(|| format!("failed to read trace: {}", path.display()))?;

    let range = summary.address_range();
    let stats = TraceStats {
        instructions: summary.instructions,
        distinct_addresses: summary.addresses.len(),
        register_syncs: summary.register_syncs,
        memory_syncs: summary.memory_syncs,
        first_address: range.map(|(low, _)| hex(low)),
        last_address: range.map(|(_, high)| hex(high)),
        addresses: if list_addresses {
            summary.addresses.iter().copied().map(hex).collect()
        } else {
            Vec::new()
        },
    };

    print_output(&stats, opts, |stats| {
        let mut tw = TabWriter::new(vec![("Event", Align::Left), ("Count", Align::Right)]);
        tw.row(vec!["instructions".into(), stats.instructions.to_string()]);
        tw.row(vec![
            "distinct addresses".into(),
            stats.distinct_addresses.to_string(),
        ]);
        tw.row(vec!["register syncs".into(), stats.register_syncs.to_string()]);
        tw.row(vec!["memory syncs".into(), stats.memory_syncs.to_string()]);
        tw.print();

        if let (Some(first), Some(last)) = (&stats.first_address, &stats.last_address) {
            println!("\nAddress range:   {first} - {last}");
        }
        if !stats.addresses.is_empty() {
            println!("\nAddresses:");
            for address in &stats.addresses {
                println!("  {address}");
            }
        }
    })
}
