/// Byte-based token estimate: `(bytes + 3) / 4`.
pub fn estimate(text: &str) -> usize {
    text.len().div_ceil(4)
}
