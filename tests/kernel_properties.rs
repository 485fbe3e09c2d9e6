//! Property tests for the redistribution kernels and layout derivation.

use field_redist::prelude::*;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Random decompositions: 1–4 ranks, 0–5 local cells each, 1–3 levels,
/// 1–3 points per cell, with an arbitrary subset of local slots mapped to
/// a shuffled permutation of global cells (the rest are null sentinels).
fn decomp_strategy() -> impl Strategy<Value = Decomposition> {
    (1usize..=4, 1usize..=3, 1usize..=3)
        .prop_flat_map(|(ranks, levels, ppc)| {
            proptest::collection::vec(0usize..6, ranks)
                .prop_map(move |cells| (cells, levels, ppc))
        })
        .prop_flat_map(|(cells, levels, ppc)| {
            let slots: usize = cells.iter().sum();
            proptest::collection::vec(any::<bool>(), slots)
                .prop_map(move |mask| (cells.clone(), levels, ppc, mask))
        })
        .prop_flat_map(|(cells, levels, ppc, mask)| {
            let mapped = mask.iter().filter(|&&m| m).count() as u32;
            Just((0..mapped).collect::<Vec<u32>>())
                .prop_shuffle()
                .prop_map(move |perm| {
                    let mut next = perm.into_iter();
                    let mut flat = mask.iter().map(|&m| {
                        if m { next.next() } else { None }
                    });
                    let maps: Vec<Vec<Option<u32>>> = cells
                        .iter()
                        .map(|&n| (&mut flat).take(n).collect())
                        .collect();
                    Decomposition::new(1, 1, mapped as usize, levels, ppc, maps)
                        .expect("generated decomposition is valid")
                })
        })
}

fn run_gather(elem: ElemType, layout: &RearrangeLayout, src: &[u8], dst: &mut [u8]) {
    fn go<T: Element>(layout: &RearrangeLayout, src: &[u8], dst: &mut [u8]) {
        rearrange_for_gather::<T>(
            layout,
            bytemuck::cast_slice(src),
            bytemuck::cast_slice_mut(dst),
        )
        .unwrap();
    }
    match elem {
        ElemType::Byte1 => go::<u8>(layout, src, dst),
        ElemType::Byte2 => go::<u16>(layout, src, dst),
        ElemType::Byte4 => go::<u32>(layout, src, dst),
        ElemType::Byte8 => go::<u64>(layout, src, dst),
    }
}

fn run_scatter(elem: ElemType, layout: &RearrangeLayout, src: &[u8], dst: &mut [u8]) {
    fn go<T: Element>(layout: &RearrangeLayout, src: &[u8], dst: &mut [u8]) {
        rearrange_for_scatter::<T>(
            layout,
            bytemuck::cast_slice(src),
            bytemuck::cast_slice_mut(dst),
        )
        .unwrap();
    }
    match elem {
        ElemType::Byte1 => go::<u8>(layout, src, dst),
        ElemType::Byte2 => go::<u16>(layout, src, dst),
        ElemType::Byte4 => go::<u32>(layout, src, dst),
        ElemType::Byte8 => go::<u64>(layout, src, dst),
    }
}

const ALL_WIDTHS: [ElemType; 4] = [
    ElemType::Byte1,
    ElemType::Byte2,
    ElemType::Byte4,
    ElemType::Byte8,
];

proptest! {
    /// scatter(gather(x)) restores every mapped slot bit-for-bit and never
    /// touches null-mapped slots, for every supported element width.
    #[test]
    fn gather_scatter_round_trip(d in decomp_strategy(), seed in any::<u64>()) {
        let layout = RearrangeLayout::from_decomp(&d);
        for elem in ALL_WIDTHS {
            let w = elem.size_bytes();
            let mut wire = AlignedBuf::zeroed(layout.wire_elems() * w);
            StdRng::seed_from_u64(seed).fill_bytes(wire.as_bytes_mut());
            let mut canonical = AlignedBuf::zeroed(layout.canonical_elems() * w);
            run_gather(elem, &layout, wire.as_bytes(), canonical.as_bytes_mut());

            let fill = 0xAAu8;
            let mut back = AlignedBuf::zeroed(wire.len());
            back.as_bytes_mut().fill(fill);
            run_scatter(elem, &layout, canonical.as_bytes(), back.as_bytes_mut());

            // Mapped slots equal the original wire bytes, null slots keep
            // the pre-fill.
            let ppc = layout.points_per_cell();
            for m in 0..layout.num_ranks() {
                if layout.counts()[m] == 0 {
                    continue;
                }
                let data_per_level = layout.counts()[m] / layout.num_levels();
                let cells = data_per_level / ppc;
                let idx_start = layout.displs()[m] / layout.num_levels() / ppc;
                for k in 0..layout.num_levels() {
                    for i in 0..cells {
                        let off = (layout.displs()[m] + k * data_per_level + i * ppc) * w;
                        let span = off..off + ppc * w;
                        if layout.indexes()[idx_start + i].is_some() {
                            prop_assert_eq!(&back.as_bytes()[span.clone()], &wire.as_bytes()[span]);
                        } else {
                            prop_assert!(back.as_bytes()[span].iter().all(|&b| b == fill));
                        }
                    }
                }
            }
        }
    }

    /// Global cells no local slot maps to are never written by the gather
    /// kernel.
    #[test]
    fn unmapped_global_cells_stay_untouched(d in decomp_strategy()) {
        let layout = RearrangeLayout::from_decomp(&d);
        let mapped: std::collections::HashSet<u32> =
            layout.indexes().iter().flatten().copied().collect();
        let elem = ElemType::Byte4;
        let w = elem.size_bytes();
        let mut wire = AlignedBuf::zeroed(layout.wire_elems() * w);
        wire.as_bytes_mut().fill(0x11);
        let fill = 0xEEu8;
        let mut canonical = AlignedBuf::zeroed(layout.canonical_elems() * w);
        canonical.as_bytes_mut().fill(fill);
        run_gather(elem, &layout, wire.as_bytes(), canonical.as_bytes_mut());

        let ppc = layout.points_per_cell();
        for g in 0..layout.total_cells() as u32 {
            if mapped.contains(&g) {
                continue;
            }
            for k in 0..layout.num_levels() {
                let off = (g as usize * ppc + k * layout.total_cells() * ppc) * w;
                prop_assert!(
                    canonical.as_bytes()[off..off + ppc * w].iter().all(|&b| b == fill)
                );
            }
        }
    }

    /// counts/displs follow the decomposition exactly and sum to the wire
    /// buffer size.
    #[test]
    fn layout_consistency(d in decomp_strategy()) {
        let layout = RearrangeLayout::from_decomp(&d);
        prop_assert!(layout.validate_invariants(&d).is_ok());
        let mut prefix = 0usize;
        for rank in 0..d.num_ranks() {
            prop_assert_eq!(
                layout.counts()[rank],
                d.num_levels() * d.local_cells(rank) * d.points_per_cell()
            );
            prop_assert_eq!(layout.displs()[rank], prefix);
            prefix += layout.counts()[rank];
        }
        prop_assert_eq!(layout.wire_elems(), prefix);
        prop_assert_eq!(layout.indexes().len(), d.total_local_cells());
    }
}

/// Scenario: single rank, 5 local cells, slot 3 null-mapped, destination
/// pre-filled with -1. After gather the null slot keeps -1, everything
/// else holds the copied source values.
#[test]
fn null_slot_keeps_sentinel_value() {
    let d = Decomposition::new(
        1,
        1,
        5,
        1,
        1,
        vec![vec![Some(0), Some(1), Some(2), None, Some(4)]],
    )
    .unwrap();
    let layout = RearrangeLayout::from_decomp(&d);
    let src: Vec<u64> = vec![
        f64::to_bits(10.0),
        f64::to_bits(11.0),
        f64::to_bits(12.0),
        f64::to_bits(13.0),
        f64::to_bits(14.0),
    ];
    let sentinel = f64::to_bits(-1.0);
    let mut dst = vec![sentinel; 5];
    rearrange_for_gather(&layout, &src, &mut dst).unwrap();
    assert_eq!(f64::from_bits(dst[3]), -1.0);
    for (g, &v) in dst.iter().enumerate() {
        if g != 3 {
            assert_eq!(f64::from_bits(v), 10.0 + g as f64);
        }
    }
}
