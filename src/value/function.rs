use std::{
    fmt,
    sync::{Arc, Weak},
};

use serde::Serialize;

use super::Kind;

/// Identifies one loader instance. The instance number changes every time a
/// tag is re-created, which is how handles minted by a destroyed loader are
/// told apart from live ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LoaderId {
    pub tag: String,
    pub instance: u64,
}

/// Loader-local identifier of a callable or opaque resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId(pub u64);

/// Release hook of the loader that owns a handle.
pub(crate) trait Releaser: Send + Sync {
    fn release(&self, symbol: SymbolId);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    /// Expected kind, when the guest runtime knows it.
    pub kind: Option<Kind>,
}

impl Param {
    pub fn new(name: impl Into<String>, kind: Option<Kind>) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Calling convention of a function handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub variadic: bool,
    pub returns: Option<Kind>,
}

impl Signature {
    /// Untyped parameters with the given names.
    pub fn untyped<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: names.into_iter().map(|n| Param::new(n, None)).collect(),
            variadic: false,
            returns: None,
        }
    }

    /// Accepts any number of untyped arguments.
    pub fn variadic() -> Self {
        Self {
            params: Vec::new(),
            variadic: true,
            returns: None,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn accepts(&self, argc: usize) -> bool {
        if self.variadic {
            argc >= self.params.len()
        } else {
            argc == self.params.len()
        }
    }
}

struct HandleInner {
    owner: LoaderId,
    symbol: SymbolId,
    name: String,
    signature: Signature,
    ephemeral: bool,
    releaser: Weak<dyn Releaser>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if !self.ephemeral {
            return;
        }
        if let Some(releaser) = self.releaser.upgrade() {
            releaser.release(self.symbol);
        }
    }
}

/// Immutable reference to a callable inside one loader.
///
/// Clones share identity. Handles minted for named symbols stay valid for as
/// long as the loader keeps the symbol; ephemeral handles (lambdas, host
/// closures) ask the loader to release the target when the last clone drops.
#[derive(Clone)]
pub struct FunctionHandle {
    inner: Arc<HandleInner>,
}

impl FunctionHandle {
    pub(crate) fn new(
        owner: LoaderId,
        symbol: SymbolId,
        name: impl Into<String>,
        signature: Signature,
        ephemeral: bool,
        releaser: Weak<dyn Releaser>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                owner,
                symbol,
                name: name.into(),
                signature,
                ephemeral,
                releaser,
            }),
        }
    }

    pub fn owner(&self) -> &LoaderId {
        &self.inner.owner
    }

    pub fn tag(&self) -> &str {
        &self.inner.owner.tag
    }

    pub fn symbol(&self) -> SymbolId {
        self.inner.symbol
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    pub fn is_ephemeral(&self) -> bool {
        self.inner.ephemeral
    }

    /// `tag:name`, the form accepted by the dispatcher.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.tag(), self.name())
    }

    /// Identity comparison: same owner instance and same symbol.
    pub fn same(&self, other: &FunctionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.owner == other.inner.owner && self.inner.symbol == other.inner.symbol)
    }
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FunctionHandle({}#{}:{})",
            self.inner.owner.tag, self.inner.owner.instance, self.inner.name
        )
    }
}

struct PointerInner {
    owner: LoaderId,
    address: SymbolId,
    releaser: Weak<dyn Releaser>,
}

impl Drop for PointerInner {
    fn drop(&mut self) {
        if let Some(releaser) = self.releaser.upgrade() {
            releaser.release(self.address);
        }
    }
}

/// Opaque foreign resource owned by a loader.
#[derive(Clone)]
pub struct Pointer {
    inner: Arc<PointerInner>,
}

impl Pointer {
    pub(crate) fn new(owner: LoaderId, address: SymbolId, releaser: Weak<dyn Releaser>) -> Self {
        Self {
            inner: Arc::new(PointerInner {
                owner,
                address,
                releaser,
            }),
        }
    }

    pub fn owner(&self) -> &LoaderId {
        &self.inner.owner
    }

    pub fn address(&self) -> SymbolId {
        self.inner.address
    }

    pub fn same(&self, other: &Pointer) -> bool {
        self.inner.owner == other.inner.owner && self.inner.address == other.inner.address
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pointer({}#{}:{})",
            self.inner.owner.tag, self.inner.owner.instance, self.inner.address.0
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingReleaser {
        released: AtomicUsize,
    }

    impl Releaser for CountingReleaser {
        fn release(&self, _symbol: SymbolId) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn owner() -> LoaderId {
        LoaderId {
            tag: "test".to_string(),
            instance: 1,
        }
    }

    #[test]
    fn ephemeral_handle_releases_once_after_last_clone() {
        let releaser = Arc::new(CountingReleaser::default());
        let weak: Weak<dyn Releaser> = Arc::downgrade(&releaser) as Weak<dyn Releaser>;
        let handle = FunctionHandle::new(owner(), SymbolId(7), "f", Signature::default(), true, weak);
        let copy = handle.clone();

        drop(handle);
        assert_eq!(releaser.released.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(releaser.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn named_handle_is_never_released() {
        let releaser = Arc::new(CountingReleaser::default());
        let weak: Weak<dyn Releaser> = Arc::downgrade(&releaser) as Weak<dyn Releaser>;
        drop(FunctionHandle::new(owner(), SymbolId(1), "g", Signature::default(), false, weak));
        assert_eq!(releaser.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn signature_arity_respects_variadic() {
        let fixed = Signature::untyped(["a", "b"]);
        assert!(fixed.accepts(2));
        assert!(!fixed.accepts(3));

        let mut variadic = Signature::untyped(["a"]);
        variadic.variadic = true;
        assert!(variadic.accepts(1));
        assert!(variadic.accepts(4));
        assert!(!variadic.accepts(0));
    }
}
