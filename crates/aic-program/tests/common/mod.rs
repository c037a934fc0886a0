//! Shared fixtures: the reference configuration and a tiny ELF writer.

#![allow(dead_code)]

use aic_program::ProgramConfig;

/// 14 cores, default threads plus one HMX thread, DDR and on-chip I/O.
pub const REFERENCE_CONFIG: &str = r#"{
    "name": "reference",
    "hwVersionMajor": 2,
    "hwVersionMinor": 0,
    "numNSPs": 14,
    "numThreads": 0,
    "numHMXThreads": 1,
    "inputs": [
        { "type": "Int8Ty", "dims": [268435456], "devOffset": 0, "dest": "DDR" },
        { "type": "Int8Ty", "dims": [8388608], "devOffset": 0, "dest": "VTCM" }
    ],
    "outputs": [
        { "type": "Int8Ty", "dims": [268435456], "devOffset": 268435456, "dest": "DDR" },
        { "type": "Int8Ty", "dims": [2048], "nsps": [0],
          "baseAddrOffset": 1040384, "devOffset": 4096, "dest": "L2TCM" }
    ]
}"#;

pub fn reference_config() -> ProgramConfig {
    ProgramConfig::from_json(REFERENCE_CONFIG).expect("reference config parses")
}

pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

const EHDR_SIZE: usize = 52;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const EM_HEXAGON: u16 = 164;
const SHN_ABS: u16 = 0xfff1;
const SHSTRTAB: &[u8] = b"\0.symtab\0.strtab\0.shstrtab\0";

fn section(out: &mut Vec<u8>, name: u32, kind: u32, offset: usize, size: usize, link: u32, entsize: u32) {
    for word in [name, kind, 0, 0, offset as u32, size as u32, link, u32::from(kind == 2), 1, entsize] {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

/// A 32-bit little-endian ELF holding only a symbol table.
///
/// Each symbol is `(name, value, type)`, bound global.
pub fn elf32(symbols: &[(&str, u32, u8)]) -> Vec<u8> {
    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; SYM_SIZE];
    for &(name, value, kind) in symbols {
        symtab.extend_from_slice(&(strtab.len() as u32).to_le_bytes());
        symtab.extend_from_slice(&value.to_le_bytes());
        symtab.extend_from_slice(&0u32.to_le_bytes());
        symtab.push((1 << 4) | kind);
        symtab.push(0);
        symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }

    let symtab_off = EHDR_SIZE;
    let strtab_off = symtab_off + symtab.len();
    let shstrtab_off = strtab_off + strtab.len();
    let shoff = (shstrtab_off + SHSTRTAB.len()).next_multiple_of(4);

    let mut out = vec![0u8; EHDR_SIZE];
    out[0..4].copy_from_slice(b"\x7fELF");
    out[4] = 1; // ELFCLASS32
    out[5] = 1; // little-endian
    out[6] = 1;
    out[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out[18..20].copy_from_slice(&EM_HEXAGON.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[32..36].copy_from_slice(&(shoff as u32).to_le_bytes());
    out[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out[42..44].copy_from_slice(&32u16.to_le_bytes());
    out[46..48].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
    out[48..50].copy_from_slice(&4u16.to_le_bytes());
    out[50..52].copy_from_slice(&3u16.to_le_bytes());

    out.extend_from_slice(&symtab);
    out.extend_from_slice(&strtab);
    out.extend_from_slice(SHSTRTAB);
    out.resize(shoff, 0);

    out.extend_from_slice(&[0u8; SHDR_SIZE]);
    section(&mut out, 1, 2, symtab_off, symtab.len(), 2, SYM_SIZE as u32);
    section(&mut out, 9, 3, strtab_off, strtab.len(), 0, 0);
    section(&mut out, 17, 3, shstrtab_off, SHSTRTAB.len(), 0, 0);
    out
}

/// Binary whose start routine sits at `addr`.
pub fn network_elf(addr: u32) -> Vec<u8> {
    elf32(&[("helper", 0x200, STT_FUNC), ("_qaic_start", addr, STT_FUNC)])
}
