use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use log::info;

use crate::core::instr::TraceInstr;

/// A lazy instruction source. When it runs dry the driver drains the
/// pipeline and ends the phase.
pub trait TraceSource {
    fn next_instr(&mut self) -> Option<TraceInstr>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Standard,
    Cloudsuite,
}

pub const STANDARD_RECORD_BYTES: usize = 64;
pub const CLOUDSUITE_RECORD_BYTES: usize = 84;

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().expect("record sized above"))
}

fn collect_regs(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|&reg| reg != 0).collect()
}

fn collect_mems(bytes: &[u8], count: usize) -> Vec<u64> {
    (0..count)
        .map(|slot| read_u64(bytes, slot * 8))
        .filter(|&addr| addr != 0)
        .collect()
}

/// Standard layout: `{ip, is_branch, branch_taken, dest_regs[2],
/// src_regs[4], dest_mems[2], src_mems[4]}`, packed little-endian.
pub fn decode_standard(record: &[u8; STANDARD_RECORD_BYTES], asid: u16) -> TraceInstr {
    TraceInstr {
        ip: read_u64(record, 0),
        is_branch: record[8] != 0,
        branch_taken: record[9] != 0,
        destination_registers: collect_regs(&record[10..12]),
        source_registers: collect_regs(&record[12..16]),
        destination_memory: collect_mems(&record[16..32], 2),
        source_memory: collect_mems(&record[32..64], 4),
        asid,
    }
}

/// Cloudsuite layout: `{ip, is_branch, branch_taken, dest_regs[4],
/// src_regs[4], dest_mems[4], src_mems[4], asid[2]}`, packed little-endian.
pub fn decode_cloudsuite(record: &[u8; CLOUDSUITE_RECORD_BYTES]) -> TraceInstr {
    TraceInstr {
        ip: read_u64(record, 0),
        is_branch: record[8] != 0,
        branch_taken: record[9] != 0,
        destination_registers: collect_regs(&record[10..14]),
        source_registers: collect_regs(&record[14..18]),
        destination_memory: collect_mems(&record[18..50], 4),
        source_memory: collect_mems(&record[50..82], 4),
        asid: u16::from_le_bytes([record[82], record[83]]),
    }
}

/// Streams packed records from a trace file, restarting at end of stream
/// when `repeat` is set.
pub struct FileTraceReader {
    path: PathBuf,
    reader: BufReader<File>,
    format: TraceFormat,
    asid: u16,
    repeat: bool,
}

impl FileTraceReader {
    pub fn new(
        path: impl AsRef<Path>,
        format: TraceFormat,
        asid: u16,
        repeat: bool,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = BufReader::new(File::open(&path)?);
        Ok(Self {
            path,
            reader,
            format,
            asid,
            repeat,
        })
    }

    fn read_record(&mut self) -> Option<TraceInstr> {
        match self.format {
            TraceFormat::Standard => {
                let mut record = [0u8; STANDARD_RECORD_BYTES];
                self.reader.read_exact(&mut record).ok()?;
                Some(decode_standard(&record, self.asid))
            }
            TraceFormat::Cloudsuite => {
                let mut record = [0u8; CLOUDSUITE_RECORD_BYTES];
                self.reader.read_exact(&mut record).ok()?;
                Some(decode_cloudsuite(&record))
            }
        }
    }
}

impl TraceSource for FileTraceReader {
    fn next_instr(&mut self) -> Option<TraceInstr> {
        if let Some(instr) = self.read_record() {
            return Some(instr);
        }
        if !self.repeat {
            return None;
        }
        info!("trace {} wrapped around", self.path.display());
        self.reader = BufReader::new(
            File::open(&self.path).expect("trace file disappeared during simulation"),
        );
        self.read_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn standard_record(ip: u64) -> [u8; STANDARD_RECORD_BYTES] {
        let mut record = [0u8; STANDARD_RECORD_BYTES];
        record[0..8].copy_from_slice(&ip.to_le_bytes());
        record
    }

    #[test]
    fn standard_decode_strips_unused_slots() {
        let mut record = standard_record(0x4000);
        record[8] = 1; // is_branch
        record[9] = 1; // taken
        record[10] = 26; // dest: instruction pointer
        record[12] = 25; // src: flags
        record[32..40].copy_from_slice(&0x8000u64.to_le_bytes()); // one source mem
        let instr = decode_standard(&record, 3);
        assert_eq!(instr.ip, 0x4000);
        assert!(instr.is_branch && instr.branch_taken);
        assert_eq!(instr.destination_registers, vec![26]);
        assert_eq!(instr.source_registers, vec![25]);
        assert!(instr.destination_memory.is_empty());
        assert_eq!(instr.source_memory, vec![0x8000]);
        assert_eq!(instr.asid, 3);
    }

    #[test]
    fn cloudsuite_decode_reads_the_asid() {
        let mut record = [0u8; CLOUDSUITE_RECORD_BYTES];
        record[0..8].copy_from_slice(&0x4000u64.to_le_bytes());
        record[82] = 0x34;
        record[83] = 0x12;
        let instr = decode_cloudsuite(&record);
        assert_eq!(instr.asid, 0x1234);
    }

    #[test]
    fn reader_repeats_when_asked() {
        let path = std::env::temp_dir().join(format!(
            "synchrotron-trace-{}.bin",
            std::process::id()
        ));
        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&standard_record(0x1000)).unwrap();
            file.write_all(&standard_record(0x2000)).unwrap();
        }

        let mut once = FileTraceReader::new(&path, TraceFormat::Standard, 0, false).unwrap();
        assert_eq!(once.next_instr().unwrap().ip, 0x1000);
        assert_eq!(once.next_instr().unwrap().ip, 0x2000);
        assert!(once.next_instr().is_none());

        let mut looped = FileTraceReader::new(&path, TraceFormat::Standard, 0, true).unwrap();
        for _ in 0..3 {
            assert_eq!(looped.next_instr().unwrap().ip, 0x1000);
            assert_eq!(looped.next_instr().unwrap().ip, 0x2000);
        }

        std::fs::remove_file(&path).ok();
    }
}
