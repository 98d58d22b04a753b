//! Feature-map descriptor and coordinate/linear-offset translation.

/// `{n, h, w, c}` with packed strides computed from geometry. Used for
/// coordinate <-> linear-offset translation when copying tensors in and
/// out of DDR layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FMap {
    /// Batch count.
    pub n: usize,
    /// Height.
    pub h: usize,
    /// Width.
    pub w: usize,
    /// Channels.
    pub c: usize,
}

/// Packed strides for one [`FMap`], in elements (not bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FMapStrides {
    /// Batch stride.
    pub ncod: usize,
    /// Row stride.
    pub hcod: usize,
    /// Column stride.
    pub wcod: usize,
    /// Channel stride (always 1 for a packed HWC layout).
    pub cod: usize,
}

impl FMap {
    /// Computes this feature map's natural packed HWC strides.
    pub const fn strides(self) -> FMapStrides {
        let cod = 1;
        let wcod = self.c * cod;
        let hcod = self.w * wcod;
        let ncod = self.h * hcod;
        FMapStrides { ncod, hcod, wcod, cod }
    }

    /// Converts a `(n, h, w, c)` coordinate to a linear element offset.
    pub const fn linear_offset(self, n: usize, h: usize, w: usize, c: usize) -> usize {
        let s = self.strides();
        n * s.ncod + h * s.hcod + w * s.wcod + c * s.cod
    }

    /// Total element count, `n*h*w*c`.
    pub const fn element_count(self) -> usize {
        self.n * self.h * self.w * self.c
    }
}

/// Selects the coordinate-walk order used when reshaping between host
/// layout (contiguous strides) and DDR layout (arbitrary strides)
/// during tensor copy-in/copy-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransDimMethod {
    /// Neither side uses a non-trivial (`y`) stride: plain contiguous copy.
    NstrideToNstride,
    /// Source is contiguous, destination has arbitrary strides.
    NstrideToYstride,
    /// Source has arbitrary strides, destination is contiguous.
    YstrideToNstride,
    /// Both sides have arbitrary strides.
    YstrideToYstride,
}

/// Reshapes `src` (laid out per `src_fmap` in host/contiguous order) into
/// `dst` (laid out per `dst_fmap`, walked in `dst_strides` order),
/// one coordinate at a time, matching the copy-in/copy-out contract of
/// spec §6.
pub fn trans_dim<T: Copy + Default>(
    dst: &mut [T],
    src: &[T],
    fmap: FMap,
    dst_strides: FMapStrides,
    method: TransDimMethod,
) {
    let natural = fmap.strides();
    for n in 0..fmap.n {
        for h in 0..fmap.h {
            for w in 0..fmap.w {
                for c in 0..fmap.c {
                    let src_off = match method {
                        TransDimMethod::NstrideToNstride | TransDimMethod::NstrideToYstride => {
                            n * natural.ncod + h * natural.hcod + w * natural.wcod + c * natural.cod
                        }
                        TransDimMethod::YstrideToNstride | TransDimMethod::YstrideToYstride => {
                            n * dst_strides.ncod + h * dst_strides.hcod + w * dst_strides.wcod + c * dst_strides.cod
                        }
                    };
                    let dst_off = match method {
                        TransDimMethod::NstrideToNstride | TransDimMethod::YstrideToNstride => {
                            n * natural.ncod + h * natural.hcod + w * natural.wcod + c * natural.cod
                        }
                        TransDimMethod::NstrideToYstride | TransDimMethod::YstrideToYstride => {
                            n * dst_strides.ncod + h * dst_strides.hcod + w * dst_strides.wcod + c * dst_strides.cod
                        }
                    };
                    if let (Some(s), Some(d)) = (src.get(src_off), dst.get_mut(dst_off)) {
                        *d = *s;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_match_packed_hwc_layout() {
        let fmap = FMap { n: 1, h: 2, w: 3, c: 4 };
        let s = fmap.strides();
        assert_eq!(s.cod, 1);
        assert_eq!(s.wcod, 4);
        assert_eq!(s.hcod, 12);
        assert_eq!(s.ncod, 24);
        assert_eq!(fmap.linear_offset(0, 1, 2, 3), 1 * 12 + 2 * 4 + 3);
    }

    #[test]
    fn trans_dim_contiguous_is_identity_copy() {
        let fmap = FMap { n: 1, h: 1, w: 2, c: 2 };
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        trans_dim(&mut dst, &src, fmap, fmap.strides(), TransDimMethod::NstrideToNstride);
        assert_eq!(dst, src);
    }
}
