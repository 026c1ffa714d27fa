use std::sync::atomic::{AtomicUsize, Ordering};

/// Process wide unique id type backed by a counter.
macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            id: usize,
        }

        impl $name {
            pub fn next() -> $name {
                static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
                let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
                $name { id }
            }

            pub fn as_usize(&self) -> usize {
                self.id
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.id)
            }
        }
    };
}

counter_id!(
    /// Identifies a job sent to the job runner
    JobId
);

counter_id!(
    /// Identifies a background worker thread
    WorkerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = JobId::next();
        let b = JobId::next();
        assert_ne!(a, b);
        assert!(b.as_usize() > a.as_usize());

        let w = WorkerId::next();
        assert_ne!(w, WorkerId::next());
    }
}
