//! Built-in template engines.
//!
//! `mako` is the process-wide dotted lookup; `jinja` registers itself as a
//! discoverable plugin like any third-party engine would.

pub mod jinja;
pub mod mako;

use std::path::{Path, PathBuf};

pub use jinja::JinjaEngine;
pub use mako::{dotted_template_lookup, DottedTemplateLookup};

/// Locate a template file below `roots`.
///
/// A reference containing `/` is a path relative to a root (or an existing
/// absolute path). Otherwise it is dotted: `pkg.mod.name` is looked up as
/// `pkg/mod/name.<ext>` for each of `extensions` in order.
pub(crate) fn find_template(roots: &[PathBuf], reference: &str, extensions: &[&str]) -> Option<PathBuf> {
    if reference.contains('/') {
        let path = Path::new(reference);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        return roots
            .iter()
            .map(|root| root.join(path))
            .find(|candidate| candidate.is_file());
    }

    let (module, name) = reference.rsplit_once('.').unwrap_or(("", reference));
    let module_dir: PathBuf = module.split('.').filter(|s| !s.is_empty()).collect();
    roots.iter().find_map(|root| {
        extensions
            .iter()
            .map(|ext| root.join(&module_dir).join(format!("{}.{}", name, ext)))
            .find(|candidate| candidate.is_file())
    })
}
