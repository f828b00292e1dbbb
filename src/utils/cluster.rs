/// Strict majority of `total` voters
pub(crate) fn is_majority(
    num: usize,
    total: usize,
) -> bool {
    num > total / 2
}
