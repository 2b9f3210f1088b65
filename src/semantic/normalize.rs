//! Reshaping of raw model output into the canonical vector format.
//!
//! Different embedding models emit different native widths while the vector
//! index compares vectors of one fixed width. Every vector goes through
//! [`to_canonical`] before it is stored or used as a query:
//! 1. Pad with zeros (narrower models) or downsample (wider models)
//! 2. Scale to unit L2 length

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Divide a vector by its L2 norm.
///
/// A zero vector has no direction and is returned unchanged.
pub fn unit_normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Append zeros until the vector is `width` long.
///
/// Vectors already at least `width` long are returned unchanged.
pub fn pad_to_width(v: &[f32], width: usize) -> Vec<f32> {
    let mut out = v.to_vec();
    if out.len() < width {
        out.resize(width, 0.0);
    }
    out
}

/// Shrink a vector to `width` components by area-weighted averaging.
///
/// The source is split into `width` bins of `len / width` source elements
/// each (fractional at the edges). Every output value is the average of the
/// source values overlapping its bin, weighted by the overlap. Unlike stride
/// sampling no source value is skipped and no bin is empty.
///
/// Vectors no longer than `width` are returned unchanged.
pub fn downsample_to_width(v: &[f32], width: usize) -> Vec<f32> {
    let len = v.len();
    if width == 0 || len <= width {
        return v.to_vec();
    }

    let scale = len as f64 / width as f64;
    let mut out = Vec::with_capacity(width);

    for bin in 0..width {
        let start = bin as f64 * scale;
        let end = (bin + 1) as f64 * scale;

        let mut acc = 0.0f64;
        let mut i = start.floor() as usize;
        while i < len && (i as f64) < end {
            let lo = start.max(i as f64);
            let hi = end.min((i + 1) as f64);
            if hi > lo {
                acc += v[i] as f64 * (hi - lo);
            }
            i += 1;
        }

        out.push((acc / scale) as f32);
    }

    out
}

/// Reshape a raw model vector to `width` and scale it to unit length.
pub fn to_canonical(v: &[f32], width: usize) -> Vec<f32> {
    let reshaped = if v.len() < width {
        pad_to_width(v, width)
    } else {
        downsample_to_width(v, width)
    };
    unit_normalize(&reshaped)
}
