//! Stand-in for rayon when the `threads` feature is off. Same method names, runs on the calling thread.

use std::slice::Iter;

pub(crate) trait FakeRayonIter<T> {
    fn par_iter(&self) -> Iter<'_, T>;
}

impl<T> FakeRayonIter<T> for [T] {
    #[inline(always)]
    fn par_iter(&self) -> Iter<'_, T> {
        self.iter()
    }
}
