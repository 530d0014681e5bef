/// Lexicographic enumerator over the k-element subsets of `0..n`.
///
/// Yields each subset exactly once, in lexicographic order, as a slice of
/// ascending indices; C(n, k) subsets in total. State is just the cursor, so
/// the enumeration is deterministic and restartable.
#[derive(Clone, Debug)]
pub struct SubsetIter {
    n: usize,
    k: usize,
    cursor: Vec<usize>,
    started: bool,
    done: bool,
}

impl SubsetIter {
    pub fn new(n: usize, k: usize) -> SubsetIter {
        SubsetIter {
            n,
            k,
            cursor: (0..k).collect(),
            started: false,
            done: k > n || k == 0,
        }
    }

    /// Advance to the next subset, or report exhaustion. The returned slice
    /// is valid until the next call.
    pub fn next_subset(&mut self) -> Option<&[usize]> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(&self.cursor);
        }

        // Find the rightmost index that can still move right, bump it and
        // pack the following indices directly after it.
        let k = self.k;
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                return None;
            }
            i -= 1;
            if self.cursor[i] != self.n - k + i {
                break;
            }
        }
        self.cursor[i] += 1;
        for j in i + 1..k {
            self.cursor[j] = self.cursor[j - 1] + 1;
        }
        Some(&self.cursor)
    }
}
