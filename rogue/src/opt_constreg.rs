// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Constant-register substitution.
//!
//! The hardware exposes a bank of read-only constant registers preloaded with
//! common values. Every pending immediate source whose exact bit pattern is
//! in the bank is rewritten to reference the constant register instead;
//! anything else stays an immediate and is materialized by pseudo-op
//! lowering.

use crate::ir::*;

/// (bit pattern, constant register index), sorted by bit pattern. The first
/// 64 registers hold the integers 0..=63; the float constants start at
/// register 64 (1.0f).
const CONSTREG_MAP: [(u32, u32); 90] = [
    (0x00000000, 0),
    (0x00000001, 1),
    (0x00000002, 2),
    (0x00000003, 3),
    (0x00000004, 4),
    (0x00000005, 5),
    (0x00000006, 6),
    (0x00000007, 7),
    (0x00000008, 8),
    (0x00000009, 9),
    (0x0000000a, 10),
    (0x0000000b, 11),
    (0x0000000c, 12),
    (0x0000000d, 13),
    (0x0000000e, 14),
    (0x0000000f, 15),
    (0x00000010, 16),
    (0x00000011, 17),
    (0x00000012, 18),
    (0x00000013, 19),
    (0x00000014, 20),
    (0x00000015, 21),
    (0x00000016, 22),
    (0x00000017, 23),
    (0x00000018, 24),
    (0x00000019, 25),
    (0x0000001a, 26),
    (0x0000001b, 27),
    (0x0000001c, 28),
    (0x0000001d, 29),
    (0x0000001e, 30),
    (0x0000001f, 31),
    (0x00000020, 32),
    (0x00000021, 33),
    (0x00000022, 34),
    (0x00000023, 35),
    (0x00000024, 36),
    (0x00000025, 37),
    (0x00000026, 38),
    (0x00000027, 39),
    (0x00000028, 40),
    (0x00000029, 41),
    (0x0000002a, 42),
    (0x0000002b, 43),
    (0x0000002c, 44),
    (0x0000002d, 45),
    (0x0000002e, 46),
    (0x0000002f, 47),
    (0x00000030, 48),
    (0x00000031, 49),
    (0x00000032, 50),
    (0x00000033, 51),
    (0x00000034, 52),
    (0x00000035, 53),
    (0x00000036, 54),
    (0x00000037, 55),
    (0x00000038, 56),
    (0x00000039, 57),
    (0x0000003a, 58),
    (0x0000003b, 59),
    (0x0000003c, 60),
    (0x0000003d, 61),
    (0x0000003e, 62),
    (0x0000003f, 63),
    (0x3a83126f, 88), /* 0.001 */
    (0x3b808081, 76), /* 1/255 */
    (0x3e000000, 70), /* 0.125 */
    (0x3e800000, 69), /* 0.25 */
    (0x3ea2f983, 80), /* 1/pi */
    (0x3f000000, 65), /* 0.5 */
    (0x3f317218, 81), /* ln(2) */
    (0x3f3504f3, 83), /* 1/sqrt(2) */
    (0x3f800000, 64), /* 1.0 */
    (0x3fb504f3, 84), /* sqrt(2) */
    (0x3fb8aa3b, 82), /* log2(e) */
    (0x3fc90fdb, 78), /* pi/2 */
    (0x40000000, 66), /* 2.0 */
    (0x40490fdb, 77), /* pi */
    (0x40800000, 67), /* 4.0 */
    (0x40c90fdb, 79), /* 2*pi */
    (0x41000000, 68), /* 8.0 */
    (0x42fe0000, 71), /* 127.0 */
    (0x43000000, 72), /* 128.0 */
    (0x437f0000, 73), /* 255.0 */
    (0x43800000, 74), /* 256.0 */
    (0x477fff00, 75), /* 65535.0 */
    (0x4b000000, 89), /* 2^23 */
    (0x7f800000, 85), /* +inf */
    (0xbf800000, 87), /* -1.0 */
    (0xff800000, 86), /* -inf */
];

/// Looks up the constant register holding the exact bit pattern `imm`.
pub fn constreg_lookup(imm: u32) -> Option<u32> {
    CONSTREG_MAP
        .binary_search_by_key(&imm, |(value, _)| *value)
        .ok()
        .map(|pos| CONSTREG_MAP[pos].1)
}

pub fn constreg(shader: &mut Shader) -> bool {
    let mut progress = false;

    for loc in shader.imm_uses() {
        let imm = shader.instr(loc.instr).srcs()[loc.slot]
            .src_ref
            .as_imm()
            .expect("Pending immediate use is not an immediate");
        if let Some(index) = constreg_lookup(imm) {
            let reg = shader.const_reg(index);
            shader.imm_use_replace(loc, reg);
            progress = true;
        }
    }

    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn map_is_sorted_and_in_range() {
        for w in CONSTREG_MAP.windows(2) {
            assert!(w[0].0 < w[1].0);
        }
        for (_, index) in CONSTREG_MAP {
            assert!(index < 240);
        }
    }

    #[test]
    fn lookup_anchor_values() {
        assert_eq!(constreg_lookup(0x3f800000), Some(64));
        assert_eq!(constreg_lookup(0x00000000), Some(0));
        assert_eq!(constreg_lookup(0xdeadbeef), None);
    }

    #[test]
    fn substitutes_pending_immediates() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (d0, d1) = (s.ssa_reg(0), s.ssa_reg(1));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let hit = b.mov(Ref::Reg(d0), Ref::Imm(0x3f800000));
        let miss = b.mov(Ref::Reg(d1), Ref::Imm(0xdeadbeef));

        assert!(constreg(&mut s));

        let c64 = s.reg_lookup(RegClass::Const, 64, None).unwrap();
        assert_eq!(s.instr(hit).srcs()[0].src_ref, Ref::Reg(c64));
        assert!(s.instr(miss).srcs()[0].src_ref.is_imm());
        assert_eq!(s.imm_uses().len(), 1);

        // Fixpoint: nothing more to substitute.
        assert!(!constreg(&mut s));
    }
}
