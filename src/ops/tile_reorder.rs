//! C10: scale-2 spatial-to-depth reordering applied after activation
//! when a generation's `tile_en` is set.
//!
//! The HWC output of shape `(dst_h, dst_w, oc)` is reshaped to
//! `(dst_h*scale, dst_w*scale, oc/scale^2)` by placing the `scale x
//! scale` sub-groups of channels into their new `(h*scale+sh,
//! w*scale+sw)` positions. Sub-group `sg` of channel `k` is
//! `k / (oc/scale^2)`, decomposed row-major as `sg = sh*scale + sw`.

/// Applies the tile reorder to `input` (flat HWC, `dst_h * dst_w * oc`
/// elements), returning the reordered buffer and its new `(h, w, oc)`.
pub fn reorder(input: &[i64], dst_h: usize, dst_w: usize, oc: usize, scale: usize) -> (Vec<i64>, usize, usize, usize) {
    let groups = scale * scale;
    let oc_out = oc / groups;
    let new_h = dst_h * scale;
    let new_w = dst_w * scale;
    let mut out = vec![0i64; new_h * new_w * oc_out];
    for h in 0..dst_h {
        for w in 0..dst_w {
            for k in 0..oc {
                let sg = k / oc_out;
                let c = k % oc_out;
                let sh = sg / scale;
                let sw = sg % scale;
                let nh = h * scale + sh;
                let nw = w * scale + sw;
                let src_idx = (h * dst_w + w) * oc + k;
                let dst_idx = (nh * new_w + nw) * oc_out + c;
                out[dst_idx] = input[src_idx];
            }
        }
    }
    (out, new_h, new_w, oc_out)
}

/// Inverts [`reorder`]: recovers the pre-reorder `(dst_h, dst_w, oc)`
/// tile from a reordered `(new_h, new_w, oc_out)` buffer.
pub fn inverse_reorder(
    input: &[i64],
    new_h: usize,
    new_w: usize,
    oc_out: usize,
    scale: usize,
) -> (Vec<i64>, usize, usize, usize) {
    let dst_h = new_h / scale;
    let dst_w = new_w / scale;
    let oc = oc_out * scale * scale;
    let mut out = vec![0i64; dst_h * dst_w * oc];
    for nh in 0..new_h {
        for nw in 0..new_w {
            let h = nh / scale;
            let sh = nh % scale;
            let w = nw / scale;
            let sw = nw % scale;
            let sg = sh * scale + sw;
            for c in 0..oc_out {
                let k = sg * oc_out + c;
                let src_idx = (nh * new_w + nw) * oc_out + c;
                let dst_idx = (h * dst_w + w) * oc + k;
                out[dst_idx] = input[src_idx];
            }
        }
    }
    (out, dst_h, dst_w, oc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_then_inverse_is_identity() {
        let dst_h = 2;
        let dst_w = 3;
        let oc = 8; // scale=2 => oc_out=2
        let scale = 2;
        let input: Vec<i64> = (0..(dst_h * dst_w * oc) as i64).collect();
        let (reordered, new_h, new_w, oc_out) = reorder(&input, dst_h, dst_w, oc, scale);
        assert_eq!((new_h, new_w, oc_out), (dst_h * scale, dst_w * scale, oc / 4));
        let (recovered, rh, rw, roc) = inverse_reorder(&reordered, new_h, new_w, oc_out, scale);
        assert_eq!((rh, rw, roc), (dst_h, dst_w, oc));
        assert_eq!(recovered, input);
    }

    #[test]
    fn reorder_places_subgroups_at_expected_offsets() {
        // oc=4, scale=2 => oc_out=1, one value per sub-group.
        let input = vec![10i64, 20, 30, 40]; // h=0,w=0 only
        let (out, new_h, new_w, oc_out) = reorder(&input, 1, 1, 4, 2);
        assert_eq!((new_h, new_w, oc_out), (2, 2, 1));
        // sg=0 -> (0,0), sg=1 -> (0,1), sg=2 -> (1,0), sg=3 -> (1,1)
        assert_eq!(out[(0 * 2 + 0) * 1], 10);
        assert_eq!(out[(0 * 2 + 1) * 1], 20);
        assert_eq!(out[(1 * 2 + 0) * 1], 30);
        assert_eq!(out[(1 * 2 + 1) * 1], 40);
    }
}
