/// Default number of photos attached to a single comment.
pub const DEFAULT_COMMENT_GROUP_SIZE: usize = 2;

/// Split `items` into consecutive chunks of at most `size`, preserving order.
///
/// A `size` of zero is treated as one.
pub fn split_into_groups<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}
