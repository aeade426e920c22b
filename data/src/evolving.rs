//! Double buffering

/// Pair of buffers where one acts as an input and the other as an output
///
/// Instead of swapping the buffers around, this tracks which of the two
/// currently holds the authoritative state, so that both buffers keep a stable
/// identity over their lifetime (which matters for device buffers that are
/// referenced by descriptor sets or similar).
#[derive(Clone, Debug, PartialEq)]
pub struct Evolving<T> {
    /// Underlying buffers
    buffers: [T; 2],

    /// Index of the buffer that currently acts as the input
    input_idx: usize,
}
//
impl<T> Evolving<T> {
    /// Set up double buffering, with `input` initially holding the state
    pub fn new(input: T, output: T) -> Self {
        Self {
            buffers: [input, output],
            input_idx: 0,
        }
    }

    /// Index of the buffer that currently holds the authoritative state
    pub fn input_idx(&self) -> usize {
        self.input_idx
    }

    /// Access the input buffer
    pub fn input(&self) -> &T {
        &self.buffers[self.input_idx]
    }

    /// Mutably access the input buffer
    pub fn input_mut(&mut self) -> &mut T {
        &mut self.buffers[self.input_idx]
    }

    /// Access the input and output buffers
    pub fn in_out(&mut self) -> (&T, &mut T) {
        let [first, second] = &mut self.buffers;
        if self.input_idx == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    /// Make the output buffer become the input one
    pub fn flip(&mut self) {
        self.input_idx = 1 - self.input_idx;
    }
}
