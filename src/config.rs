use crate::alloc::registry::DEFAULT_CAPACITY;

/// What `realloc(NULL, size)` does.
///
/// The C contract says it behaves like `malloc(size)`, which is `Allocate`.
/// `Fatal` looks NULL up like any other pointer, finds no record, and reports
/// an invalid free.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReallocNull {
    #[default]
    Allocate,
    Fatal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of allocations the registry can hold
    pub capacity: usize,
    pub realloc_null: ReallocNull,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            realloc_null: ReallocNull::Allocate,
        }
    }

    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub const fn realloc_null(mut self, realloc_null: ReallocNull) -> Self {
        self.realloc_null = realloc_null;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
