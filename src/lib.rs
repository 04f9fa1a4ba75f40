//! ccdb – a calibration-constants store.
//!
//! Calibration constants are small typed tables that are valid for a range of
//! experiment runs. ccdb keeps them in a hierarchical namespace and never
//! overwrites them: every change adds a new version, so any past state can be
//! reproduced. A lookup names
//! * a path such as `/test/test_vars/test_table`, where the last segment is a
//!   [`construct::TypeTable`] and everything before it a [`construct::Directory`];
//! * a run number, matched against the inclusive [`construct::RunRange`] of
//!   each stored [`construct::Assignment`];
//! * a [`construct::Variation`], an alternative track of constants
//!   (`default` when omitted);
//! * optionally a time or a version, to reproduce an earlier state.
//!
//! ## Modules
//! * [`lexical`] – Tokenizer for calibration text (quoting, escapes, comments).
//! * [`datatype`] – Column types and typed cell values.
//! * [`table`] – Tokens paged into rows and columns, and back into text.
//! * [`construct`] – Entities, the directory tree arena, names, paths, wildcards.
//! * [`cache`] – Keepers owning retrieved entities, and the ownership tags
//!   handed to callers.
//! * [`backend`] – The [`backend::BackendPort`] storage interface and an
//!   in-memory adapter.
//! * [`persist`] – SQLite adapter.
//! * [`resolve`] – Assignment selection and the write path.
//! * [`session`] – The public API: one backend, its cache and error log behind one lock.
//! * [`interface`] – Deadlines and cancellation for backend calls.
//! * [`request`] – `path:run:variation:time` request strings.
//! * [`settings`] – Configuration from file and environment.
//! * [`error`] – Error type, codes and the bounded error log.
//!
//! ## Resolution
//! Out of the assignments of the table and variation whose run range
//! contains the run, a version request picks that exact version, a time picks
//! the latest created at or before it, and otherwise the latest wins (ties
//! go to the greater version). Blobs are parsed on first access and kept.
//!
//! ## Ownership
//! Directories and type tables depend on the directory structure. Handles to
//! them come back as [`cache::Fetched::Cached`] and go stale once the tree is
//! rebuilt by a directory change; releasing them with
//! [`session::Session::release_ownership`] turns them into
//! [`cache::Fetched::Owned`] values the caller keeps regardless.
//!
//! ## Quick Start
//! ```
//! use ccdb::resolve::{NewAssignment, Query};
//! use ccdb::session::Session;
//! let session = Session::in_memory().unwrap();
//! session.make_directory("test", "/", "").unwrap();
//! session
//!     .create_type_table("gains", "/test", 1, &[("x", "double"), ("y", "double")], "")
//!     .unwrap();
//! session
//!     .create_assignment(&NewAssignment::from_text("/test/gains", "1.5 2.5").runs(0, 100))
//!     .unwrap();
//! let resolved = session.resolve(&Query::new("/test/gains", 42)).unwrap();
//! assert_eq!(resolved.table().unwrap().value::<f64>(0, 1).unwrap(), 2.5);
//! ```

pub mod backend;
pub mod cache;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod interface;
pub mod lexical;
pub mod persist;
pub mod request;
pub mod resolve;
pub mod session;
pub mod settings;
pub mod table;
