//! Backend kinds and selection
//!
//! Which backends exist is fixed at build time (target, threading
//! configuration, cargo features). Selection maps a user-supplied name to
//! one of them, distinguishing "never heard of it" from "known, but not in
//! this build".
//!
//! | Name | Kind | Built when |
//! |------|------|------------|
//! | `select` | `ReadinessPoll` | unix, non-threaded |
//! | `mio` | `AsyncCompletionPosix` | unix, threaded |
//! | `uring` | `AsyncCompletionNative` | Linux + `io-uring` feature |
//! | `winio` | Windows completion ports | never on unix |
//! | `win32-legacy` | `LegacyNative` | never on unix |

pub(crate) mod completion;
pub(crate) mod poller;
pub(crate) mod select;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub(crate) mod uring;

use core::fmt;

/// Token that resolves to the default backend for the threading configuration
pub const AUTO: &str = "auto";

/// Runtime threading configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Threading {
    /// One capability, no helper threads
    NonThreaded,
    /// Many capabilities, helper threads allowed
    Threaded,
}

/// I/O manager backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Per-capability `poll(2)` over pending descriptors
    ReadinessPoll,
    /// Helper thread multiplexing readiness for all capabilities
    AsyncCompletionPosix,
    /// Helper thread driving io_uring
    AsyncCompletionNative,
    /// Windows legacy native I/O
    LegacyNative,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::ReadinessPoll,
        BackendKind::AsyncCompletionPosix,
        BackendKind::AsyncCompletionNative,
        BackendKind::LegacyNative,
    ];

    /// Name accepted by `--io-manager=`
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::ReadinessPoll => "select",
            BackendKind::AsyncCompletionPosix => "mio",
            BackendKind::AsyncCompletionNative => "uring",
            BackendKind::LegacyNative => "win32-legacy",
        }
    }

    /// Exact, case-sensitive name lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Waits resolve on a helper thread and are posted back
    #[inline]
    pub const fn is_completion_based(self) -> bool {
        matches!(
            self,
            BackendKind::AsyncCompletionPosix | BackendKind::AsyncCompletionNative
        )
    }

    /// Backend works on native OS handles rather than plain descriptors
    #[inline]
    pub const fn is_native(self) -> bool {
        matches!(
            self,
            BackendKind::AsyncCompletionNative | BackendKind::LegacyNative
        )
    }

    /// Compiled into this build for `threading`
    pub fn is_built(self, threading: Threading) -> bool {
        match self {
            BackendKind::ReadinessPoll => cfg!(unix) && threading == Threading::NonThreaded,
            BackendKind::AsyncCompletionPosix => cfg!(unix) && threading == Threading::Threaded,
            BackendKind::AsyncCompletionNative => {
                cfg!(all(target_os = "linux", feature = "io-uring"))
            }
            BackendKind::LegacyNative => false,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of `select_backend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAvailability {
    Available(BackendKind),
    /// Known name, not built for this configuration
    Unavailable,
    /// Unknown name
    Unrecognised,
}

/// The backends built for one threading configuration
#[derive(Debug, Clone, Copy)]
pub struct BackendSet {
    threading: Threading,
}

impl BackendSet {
    pub const fn new(threading: Threading) -> Self {
        Self { threading }
    }

    #[inline]
    pub fn threading(&self) -> Threading {
        self.threading
    }

    /// Default used for `auto`
    pub fn default_backend(&self) -> BackendKind {
        match self.threading {
            Threading::NonThreaded => BackendKind::ReadinessPoll,
            Threading::Threaded => BackendKind::AsyncCompletionPosix,
        }
    }

    pub fn select(&self, requested: &str) -> BackendAvailability {
        if requested == AUTO {
            let kind = self.default_backend();
            return if kind.is_built(self.threading) {
                BackendAvailability::Available(kind)
            } else {
                BackendAvailability::Unavailable
            };
        }
        match BackendKind::from_name(requested) {
            Some(kind) if kind.is_built(self.threading) => BackendAvailability::Available(kind),
            Some(_) => BackendAvailability::Unavailable,
            None if FOREIGN.contains(&requested) => BackendAvailability::Unavailable,
            None => BackendAvailability::Unrecognised,
        }
    }

    /// Built backends in declaration order
    pub fn built(&self) -> impl Iterator<Item = BackendKind> {
        let threading = self.threading;
        BackendKind::ALL
            .into_iter()
            .filter(move |k| k.is_built(threading))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.built().map(BackendKind::name).collect()
    }

    /// Help line: `"select|uring (default: select)"`
    pub fn usage(&self) -> String {
        format!(
            "{} (default: {})",
            self.names().join("|"),
            self.default_backend().name()
        )
    }
}

/// Map a backend name to a built backend
pub fn select_backend(requested: &str, threading: Threading) -> BackendAvailability {
    BackendSet::new(threading).select(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BackendKind::from_name("SELECT"), None);
        assert_eq!(BackendKind::from_name(""), None);
    }

    #[test]
    fn test_select_unrecognised() {
        assert_eq!(
            select_backend("bogus", Threading::Threaded),
            BackendAvailability::Unrecognised
        );
        assert_eq!(
            select_backend("Mio", Threading::Threaded),
            BackendAvailability::Unrecognised
        );
    }

    #[test]
    fn test_select_unavailable() {
        assert_eq!(
            select_backend("win32-legacy", Threading::NonThreaded),
            BackendAvailability::Unavailable
        );
        assert_eq!(
            select_backend("mio", Threading::NonThreaded),
            BackendAvailability::Unavailable
        );
        assert_eq!(
            select_backend("select", Threading::Threaded),
            BackendAvailability::Unavailable
        );
        for threading in [Threading::NonThreaded, Threading::Threaded] {
            assert_eq!(select_backend("winio", threading), BackendAvailability::Unavailable);
        }
        // Matching stays exact for foreign names too
        assert_eq!(
            select_backend("WinIO", Threading::Threaded),
            BackendAvailability::Unrecognised
        );
    }

    #[test]
    fn test_select_available() {
        assert_eq!(
            select_backend("select", Threading::NonThreaded),
            BackendAvailability::Available(BackendKind::ReadinessPoll)
        );
        assert_eq!(
            select_backend("mio", Threading::Threaded),
            BackendAvailability::Available(BackendKind::AsyncCompletionPosix)
        );
        assert_eq!(
            select_backend(AUTO, Threading::Threaded),
            BackendAvailability::Available(BackendKind::AsyncCompletionPosix)
        );
    }

    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    #[test]
    fn test_uring_built_for_both_threading_modes() {
        for threading in [Threading::NonThreaded, Threading::Threaded] {
            assert_eq!(
                select_backend("uring", threading),
                BackendAvailability::Available(BackendKind::AsyncCompletionNative)
            );
        }
    }

    #[test]
    fn test_native_predicate() {
        assert!(!BackendKind::ReadinessPoll.is_native());
        assert!(!BackendKind::AsyncCompletionPosix.is_native());
        assert!(BackendKind::AsyncCompletionNative.is_native());
        assert!(BackendKind::LegacyNative.is_native());
    }

    #[test]
    fn test_usage_lists_built_backends() {
        let set = BackendSet::new(Threading::NonThreaded);
        assert!(set.names().contains(&"select"));
        assert!(!set.names().contains(&"win32-legacy"));
        assert!(!set.names().contains(&"winio"));
        assert!(set.usage().ends_with("(default: select)"));

        let set = BackendSet::new(Threading::Threaded);
        assert_eq!(set.names().first(), Some(&"mio"));
    }
}
