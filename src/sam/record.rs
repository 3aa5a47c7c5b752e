// Alignment record text synthesis.
//
// Turns a resolved alignment plus the original read into one SAM line:
// mandatory columns, CIGAR, then the auxiliary tags in fixed order: RG, PG,
// MD/NM (mapped only), AS, FZ (flow space, when enabled), XA (staged runs),
// XZ (flow space), then caller-supplied tags.

use std::io::Write;

use crate::algos;
use crate::driver::{Alignment, Strand};
use crate::error::{MapError, Result};
use crate::refindex::{residue_char_to_code, residue_code_to_char, RefIndex};
use crate::sam::cigar::{self, CigarOp, CigarOpKind};
use crate::sam::PROGRAM_NAME;
use crate::seq::Read;

/// Read-only synthesis context, threaded through the pipeline instead of
/// living in process globals.
#[derive(Debug, Clone, Copy)]
pub struct SamContext<'a> {
    pub reference: &'a RefIndex,
    pub rg_id: &'a str,
    /// Emit FZ/XZ flow-space tags (the `-Y` option)
    pub flowspace_tags: bool,
}

fn write_flowgram<W: Write>(writer: &mut W, flowgram: &[u16]) -> Result<()> {
    write!(writer, "\tFZ:B:S")?;
    for intensity in flowgram {
        write!(writer, ",{intensity}")?;
    }
    Ok(())
}

fn write_seq_and_qual<W: Write>(writer: &mut W, read: &Read) -> Result<()> {
    writer.write_all(read.bases())?;
    writer.write_all(b"\t")?;
    if read.quals().is_empty() {
        writer.write_all(b"*")?;
    } else {
        writer.write_all(read.quals())?;
    }
    Ok(())
}

/// Emit an unmapped record: invalid-reference flag, position 0, `*` CIGAR,
/// the read's own bases and qualities, RG/PG, and the flowgram when the
/// format and options call for it.
pub fn print_unmapped<W: Write>(writer: &mut W, read: &Read, ctx: &SamContext) -> Result<()> {
    write!(writer, "{}\t{}\t*\t0\t0\t*\t*\t0\t0\t", read.name(), 0x4)?;
    write_seq_and_qual(writer, read)?;
    write!(writer, "\tRG:Z:{}\tPG:Z:{}", ctx.rg_id, PROGRAM_NAME)?;
    if ctx.flowspace_tags {
        if let Some(flowgram) = read.flowgram() {
            write_flowgram(writer, flowgram)?;
        }
    }
    writeln!(writer)?;
    Ok(())
}

/// Emit a mapped record.
///
/// Reverse-strand reads are reverse-complemented for the duration of the
/// write and restored afterwards; callers never observe a mutated read.
pub fn print_mapped<W: Write>(
    writer: &mut W,
    read: &mut Read,
    aln: &Alignment,
    ctx: &SamContext,
    extra_tags: &[(String, String)],
) -> Result<()> {
    let reverse = aln.strand == Strand::Reverse;
    if reverse {
        read.reverse_complement();
    }
    let result = print_mapped_inner(writer, read, aln, ctx, extra_tags);
    if reverse {
        read.reverse_complement();
    }
    result
}

fn print_mapped_inner<W: Write>(
    writer: &mut W,
    read: &Read,
    aln: &Alignment,
    ctx: &SamContext,
    extra_tags: &[(String, String)],
) -> Result<()> {
    let pos_1based = aln
        .pos
        .checked_add(1)
        .ok_or_else(|| MapError::OutOfRange("position is out of range".to_string()))?;
    let flag: u16 = if aln.strand == Strand::Reverse { 0x10 } else { 0 };
    let ann = ctx.reference.ann(aln.seqid)?;

    write!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}\t*\t0\t0\t",
        read.name(),
        flag,
        ann.name,
        pos_1based,
        aln.mapq,
        cigar::cigar_string(&aln.cigar)
    )?;
    write_seq_and_qual(writer, read)?;

    write!(writer, "\tRG:Z:{}\tPG:Z:{}", ctx.rg_id, PROGRAM_NAME)?;

    let (md, nm) = md_and_nm(ctx.reference, read.bases(), aln.seqid, aln.pos, &aln.cigar)?;
    write!(writer, "\tMD:Z:{md}\tNM:i:{nm}")?;

    write!(writer, "\tAS:i:{}", aln.score)?;

    if ctx.flowspace_tags {
        if let Some(flowgram) = read.flowgram() {
            write_flowgram(writer, flowgram)?;
        }
    }

    if aln.stage > 0 {
        write!(writer, "\tXA:Z:{}-{}", algos::id_to_name(aln.algo_id)?, aln.stage)?;
    }

    if read.is_flow_space() {
        write!(writer, "\tXZ:i:{}", aln.ascore)?;
    }

    for (tag, value) in extra_tags {
        write!(writer, "\t{tag}:{value}")?;
    }

    writeln!(writer)?;
    Ok(())
}

/// Compute the MD tag and NM edit distance for one alignment.
///
/// The covered reference span is fetched once and recorded IUPAC codes are
/// overlaid before diffing; a CIGAR that walks past the reference sequence
/// is an invariant violation, not a recoverable condition.
pub fn md_and_nm(
    reference: &RefIndex,
    bases: &[u8],
    seqid: usize,
    pos: u64,
    cigar: &[CigarOp],
) -> Result<(String, i32)> {
    if cigar.is_empty() {
        return Err(MapError::OutOfRange(
            "cannot compute MD for an empty cigar".to_string(),
        ));
    }

    let ann = reference.ann(seqid)?;
    let span = cigar::reference_span(cigar);
    if pos + span > ann.length {
        return Err(MapError::OutOfRange(format!(
            "cigar spans {}..{} beyond reference {} of length {}",
            pos,
            pos + span,
            ann.name,
            ann.length
        )));
    }
    let target = reference.subseq_with_ambiguities(ann.offset + pos, span)?;

    let mut md = String::with_capacity(32);
    let mut nm = 0i32;
    let mut run = 0u32; // length of the current match run
    let mut read_i = 0usize;
    let mut ref_i = 0usize;

    for op in cigar {
        match op.kind {
            CigarOpKind::Match => {
                for _ in 0..op.len {
                    let read_base = bases
                        .get(read_i)
                        .map(|&b| residue_char_to_code(b))
                        .ok_or_else(|| {
                            MapError::OutOfRange("cigar walks past the read".to_string())
                        })?;
                    let ref_base = target[ref_i];
                    if read_base < 4 && read_base == ref_base {
                        run += 1;
                    } else {
                        md.push_str(&run.to_string());
                        md.push(residue_code_to_char(ref_base));
                        run = 0;
                        nm += 1;
                    }
                    read_i += 1;
                    ref_i += 1;
                }
            }
            CigarOpKind::Insertion => {
                read_i += op.len as usize;
                nm += op.len as i32;
            }
            CigarOpKind::Deletion => {
                md.push_str(&run.to_string());
                md.push('^');
                for _ in 0..op.len {
                    md.push(residue_code_to_char(target[ref_i]));
                    ref_i += 1;
                }
                run = 0;
                nm += op.len as i32;
            }
            CigarOpKind::RefSkip => {
                ref_i += op.len as usize;
            }
            CigarOpKind::SoftClip => {
                read_i += op.len as usize;
            }
            CigarOpKind::HardClip | CigarOpKind::Pad => {}
        }
    }
    md.push_str(&run.to_string());

    Ok((md, nm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::{FastqRead, SffRead};

    fn reference() -> RefIndex {
        RefIndex::from_sequences(&[("chr1", b"ACGTACGT".as_slice())])
    }

    fn fastq(bases: &[u8]) -> Read {
        Read::Fastq(FastqRead {
            name: "r1".to_string(),
            bases: bases.to_vec(),
            quals: vec![b'I'; bases.len()],
        })
    }

    fn aln(pos: u64, strand: Strand, cigar: Vec<CigarOp>) -> Alignment {
        Alignment {
            seqid: 0,
            pos,
            strand,
            cigar,
            mapq: 37,
            score: 8,
            ascore: 0,
            algo_id: algos::ALGO_EXACT,
            stage: 0,
        }
    }

    fn record_for(read: &mut Read, aln: &Alignment, reference: &RefIndex) -> String {
        let ctx = SamContext {
            reference,
            rg_id: "rg1",
            flowspace_tags: false,
        };
        let mut out = Vec::new();
        print_mapped(&mut out, read, aln, &ctx, &[]).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_md_all_match_with_one_mismatch() {
        let reference = reference();
        let cigar = vec![CigarOp::new(CigarOpKind::Match, 8)];
        let (md, nm) = md_and_nm(&reference, b"ACGAACGT", 0, 0, &cigar).unwrap();
        assert_eq!(md, "3T4");
        assert_eq!(nm, 1);
    }

    #[test]
    fn test_md_with_deletion() {
        let reference = RefIndex::from_sequences(&[("chr1", b"ACGT".as_slice())]);
        let cigar = vec![
            CigarOp::new(CigarOpKind::Match, 1),
            CigarOp::new(CigarOpKind::Deletion, 2),
            CigarOp::new(CigarOpKind::Match, 1),
        ];
        let (md, nm) = md_and_nm(&reference, b"AT", 0, 0, &cigar).unwrap();
        assert_eq!(md, "1^CG1");
        assert_eq!(nm, 2);
    }

    #[test]
    fn test_md_insertion_and_soft_clip() {
        let reference = reference();
        // 2S3M2I3M against ACGTACGT starting at 0: SS ACG ++ TAC
        let cigar = vec![
            CigarOp::new(CigarOpKind::SoftClip, 2),
            CigarOp::new(CigarOpKind::Match, 3),
            CigarOp::new(CigarOpKind::Insertion, 2),
            CigarOp::new(CigarOpKind::Match, 3),
        ];
        let (md, nm) = md_and_nm(&reference, b"NNACGGGTAC", 0, 0, &cigar).unwrap();
        assert_eq!(md, "6");
        assert_eq!(nm, 2);
    }

    #[test]
    fn test_md_iupac_reference_base_is_mismatch() {
        let reference = RefIndex::from_sequences(&[("chr1", b"ACRT".as_slice())]);
        let cigar = vec![CigarOp::new(CigarOpKind::Match, 4)];
        let (md, nm) = md_and_nm(&reference, b"ACGT", 0, 0, &cigar).unwrap();
        assert_eq!(md, "2R1");
        assert_eq!(nm, 1);
    }

    #[test]
    fn test_md_past_reference_end_is_fatal() {
        let reference = reference();
        let cigar = vec![CigarOp::new(CigarOpKind::Match, 12)];
        assert!(md_and_nm(&reference, b"ACGTACGTACGT", 0, 0, &cigar).is_err());
    }

    #[test]
    fn test_mapped_record_fields() {
        let reference = reference();
        let mut read = fastq(b"GTAC");
        let aln = aln(2, Strand::Forward, vec![CigarOp::new(CigarOpKind::Match, 4)]);
        let record = record_for(&mut read, &aln, &reference);
        let fields: Vec<&str> = record.trim_end().split('\t').collect();
        assert_eq!(fields[0], "r1");
        assert_eq!(fields[1], "0");
        assert_eq!(fields[2], "chr1");
        assert_eq!(fields[3], "3"); // 1-based
        assert_eq!(fields[4], "37");
        assert_eq!(fields[5], "4M");
        assert_eq!(fields[9], "GTAC");
        assert!(fields.contains(&"RG:Z:rg1"));
        assert!(fields.contains(&"MD:Z:4"));
        assert!(fields.contains(&"NM:i:0"));
        assert!(fields.contains(&"AS:i:8"));
    }

    #[test]
    fn test_reverse_strand_printing_is_non_destructive() {
        let reference = reference();
        let mut read = Read::Fastq(FastqRead {
            name: "r1".to_string(),
            bases: b"AAGT".to_vec(),
            quals: b"ABCD".to_vec(),
        });
        let original_bases = read.bases().to_vec();
        let original_quals = read.quals().to_vec();
        let aln = aln(0, Strand::Reverse, vec![CigarOp::new(CigarOpKind::Match, 4)]);
        let record = record_for(&mut read, &aln, &reference);
        assert!(record.starts_with("r1\t16\t"));
        // the record holds the reverse-complemented bases and reversed quals
        assert!(record.contains("\tACTT\tDCBA\t"));
        // but the in-memory read is untouched after printing
        assert_eq!(read.bases(), original_bases.as_slice());
        assert_eq!(read.quals(), original_quals.as_slice());
    }

    #[test]
    fn test_xa_tag_only_for_staged_provenance() {
        let reference = reference();
        let mut read = fastq(b"ACGT");
        let mut a = aln(0, Strand::Forward, vec![CigarOp::new(CigarOpKind::Match, 4)]);
        let record = record_for(&mut read, &a, &reference);
        assert!(!record.contains("XA:Z:"));
        a.stage = 2;
        let record = record_for(&mut read, &a, &reference);
        assert!(record.contains("\tXA:Z:exact-2"));
    }

    #[test]
    fn test_unmapped_record_shape() {
        let reference = reference();
        let read = fastq(b"ACGT");
        let ctx = SamContext {
            reference: &reference,
            rg_id: "rg1",
            flowspace_tags: false,
        };
        let mut out = Vec::new();
        print_unmapped(&mut out, &read, &ctx).unwrap();
        let record = String::from_utf8(out).unwrap();
        assert_eq!(
            record,
            format!("r1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\tRG:Z:rg1\tPG:Z:{PROGRAM_NAME}\n")
        );
    }

    #[test]
    fn test_flowgram_tag_on_flow_space_reads() {
        let reference = reference();
        let read = Read::Sff(SffRead {
            name: "f1".to_string(),
            bases: b"ACGT".to_vec(),
            quals: vec![b'I'; 4],
            flowgram: vec![100, 0, 99, 102],
            flow_order: "TACG".to_string(),
            key_seq: "TCAG".to_string(),
            clip_qual: (0, 0),
            clip_adapter: (0, 0),
        });
        let ctx = SamContext {
            reference: &reference,
            rg_id: "rg1",
            flowspace_tags: true,
        };
        let mut out = Vec::new();
        print_unmapped(&mut out, &read, &ctx).unwrap();
        let record = String::from_utf8(out).unwrap();
        assert!(record.contains("\tFZ:B:S,100,0,99,102"));

        // mapped flow-space records also carry the auxiliary score
        let mut read = read;
        let a = aln(0, Strand::Forward, vec![CigarOp::new(CigarOpKind::Match, 4)]);
        let mut out = Vec::new();
        print_mapped(&mut out, &mut read, &a, &ctx, &[]).unwrap();
        let record = String::from_utf8(out).unwrap();
        assert!(record.contains("\tFZ:B:S,100,0,99,102"));
        assert!(record.contains("\tXZ:i:0"));
    }
}
