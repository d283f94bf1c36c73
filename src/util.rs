//! Index arithmetic shared by stack views and handles.

/// Resolve a relative index against the window `bottom..=top`.
///
/// Positive indices count up from `bottom`, negative ones down from `top`.
/// Anything that does not land on a positive absolute index, including
/// arithmetic that overflows `i32`, yields 0.
pub fn abs_index(n: i32, bottom: i32, top: i32) -> i32 {
    let n = match n {
        n if n < 0 => n.checked_add(top).and_then(|n| n.checked_add(1)),
        n if n > 0 => n.checked_add(bottom - 1),
        _ => None,
    };
    n.map_or(0, |n| n.max(0))
}
