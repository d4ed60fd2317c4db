//! Stack growth for the recursive tree walkers
//!
//! The parser, checker, evaluator and formatter all recurse once per level
//! of source nesting. Each entry point for a level runs through [`guarded`]
//! so a rule nested up to the parse depth limit never exhausts the stack of
//! the calling thread, whatever its size.

/// Remaining stack below which a new segment is allocated
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each new segment
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

#[inline]
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, f)
}
