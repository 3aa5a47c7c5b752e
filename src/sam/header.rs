// Read-group header management and SAM header emission.
//
// The read-group line is resolved exactly once per run, before any record is
// emitted; the resolved id is then threaded read-only through record
// synthesis.

use std::io::Write;

use crate::error::{MapError, Result};
use crate::refindex::RefIndex;
use crate::sam::{PROGRAM_NAME, PROGRAM_VERSION, SAM_VERSION};

/// The recognized read-group tags, in canonical emission order.
pub const RG_TAGS: [&str; 12] = [
    "ID", "CN", "DS", "DT", "FO", "KS", "LB", "PG", "PI", "PL", "PU", "SM",
];

const DEFAULT_RG_ID: &str = "ID";

/// The resolved read group: the canonical `@RG` line and the id stamped into
/// every output record.
#[derive(Debug, Clone)]
pub struct ReadGroup {
    pub line: String,
    pub id: String,
}

/// Run-level sources for tags that must not also come from the user line:
/// a flow order or key sequence already known out of band, and the program
/// name, which always exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunMeta<'a> {
    pub flow_order: Option<&'a str>,
    pub key_seq: Option<&'a str>,
}

/// Join repeated `-R` fragments into one raw line: fragments are separated
/// by tabs, a leading `@RG` is supplied once, trailing whitespace dropped.
pub fn join_rg_fragments(fragments: &[String]) -> Option<String> {
    let first = fragments.first()?;
    let mut raw = if first.starts_with("@RG") {
        first.trim_end().to_string()
    } else {
        format!("@RG\t{}", first.trim_end())
    };
    for fragment in &fragments[1..] {
        let fragment = fragment.trim_end();
        if fragment.is_empty() {
            continue;
        }
        if !fragment.starts_with('\t') && !fragment.starts_with("\\t") {
            raw.push('\t');
        }
        raw.push_str(fragment);
    }
    Some(raw)
}

/// Validate and canonicalize a user-supplied `@RG` line, or synthesize one
/// from the run metadata when no line was given.
pub fn resolve_read_group(user_line: Option<&str>, meta: &RunMeta) -> Result<ReadGroup> {
    match user_line {
        Some(raw) => parse_rg_line(raw, meta),
        None => Ok(synthesize_read_group(meta)),
    }
}

fn synthesize_read_group(meta: &RunMeta) -> ReadGroup {
    let mut line = format!("@RG\tID:{DEFAULT_RG_ID}");
    if let Some(fo) = meta.flow_order {
        line.push_str(&format!("\tFO:{fo}"));
    }
    if let Some(ks) = meta.key_seq {
        line.push_str(&format!("\tKS:{ks}"));
    }
    line.push_str(&format!("\tPG:{PROGRAM_NAME}"));
    ReadGroup {
        line,
        id: DEFAULT_RG_ID.to_string(),
    }
}

fn parse_rg_line(raw: &str, meta: &RunMeta) -> Result<ReadGroup> {
    // literal "\t" sequences become real tabs before validation
    let rg = raw.replace("\\t", "\t");

    if !rg.starts_with("@RG\t") {
        return Err(MapError::CommandLineArgument(
            "malformed RG line".to_string(),
        ));
    }

    let mut values: [Option<&str>; 12] = [None; 12];

    for field in rg["@RG\t".len()..].split('\t') {
        let bytes = field.as_bytes();
        if bytes.len() < 3 || bytes[2] != b':' {
            return Err(MapError::CommandLineArgument(format!(
                "improper tag in the RG line: {field}"
            )));
        }
        let tag = &field[..2];
        let Some(tag_i) = RG_TAGS.iter().position(|t| *t == tag) else {
            return Err(MapError::CommandLineArgument(format!(
                "improper tag in the RG line: {tag}"
            )));
        };
        if field.len() == 3 {
            return Err(MapError::CommandLineArgument(format!(
                "found an empty {tag} tag in the RG line"
            )));
        }
        match tag {
            "FO" if meta.flow_order.is_some() => {
                return Err(MapError::CommandLineArgument(
                    "FO tag not allowed in the RG line".to_string(),
                ));
            }
            "KS" if meta.key_seq.is_some() => {
                return Err(MapError::CommandLineArgument(
                    "KS tag not allowed in the RG line".to_string(),
                ));
            }
            // PG is always derived from the program name
            "PG" => {
                return Err(MapError::CommandLineArgument(
                    "PG tag not allowed in the RG line".to_string(),
                ));
            }
            _ => {}
        }
        if values[tag_i].is_some() {
            return Err(MapError::CommandLineArgument(format!(
                "found multiple {tag} tags in the RG line"
            )));
        }
        values[tag_i] = Some(field);
    }

    // canonical reconstruction: present tags in fixed table order, verbatim
    let mut line = String::from("@RG");
    for field in values.into_iter().flatten() {
        line.push('\t');
        line.push_str(field);
    }

    let id = values[0]
        .map(|f| f[3..].to_string())
        .unwrap_or_else(|| DEFAULT_RG_ID.to_string());

    Ok(ReadGroup { line, id })
}

/// Emit the full SAM header: @HD, one @SQ per reference sequence in index
/// order, the resolved @RG line, and @PG with the original command line.
pub fn write_header<W: Write>(
    writer: &mut W,
    reference: &RefIndex,
    read_group: &ReadGroup,
    argv: &[String],
) -> Result<()> {
    writeln!(writer, "@HD\tVN:{SAM_VERSION}\tSO:unsorted")?;
    for ann in reference.anns() {
        writeln!(writer, "@SQ\tSN:{}\tLN:{}", ann.name, ann.length)?;
    }
    writeln!(writer, "{}", read_group.line)?;
    writeln!(
        writer,
        "@PG\tID:{PROGRAM_NAME}\tVN:{PROGRAM_VERSION}\tCL:{}",
        argv.join(" ")
    )?;
    Ok(())
}
