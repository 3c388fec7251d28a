//! Static resource declarations.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A request to serve a file (or a whole directory) of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRegistration {
    /// Dotted module name, e.g. `demo.widgets`.
    pub module: String,
    /// File name relative to the module directory.
    pub filename: String,
    /// Serve every file below `filename` instead of the single file.
    pub whole_dir: bool,
}

impl ResourceRegistration {
    pub fn new(module: impl Into<String>, filename: impl Into<String>, whole_dir: bool) -> Self {
        Self {
            module: module.into(),
            filename: filename.into(),
            whole_dir,
        }
    }

    /// Path of the resource below the serving prefix (`module/filename`).
    pub fn key(&self) -> String {
        format!("{}/{}", self.module, self.filename.trim_matches('/'))
    }
}

/// Where in an HTML page resource links are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectLocation {
    /// Right after the `<head>` opening tag.
    #[default]
    Head,
    /// Right before `</head>`.
    HeadBottom,
    /// Right after the `<body>` opening tag.
    BodyTop,
    /// Right before `</body>`.
    BodyBottom,
}

impl InjectLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::HeadBottom => "headbottom",
            Self::BodyTop => "bodytop",
            Self::BodyBottom => "bodybottom",
        }
    }
}

impl FromStr for InjectLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "head" => Ok(Self::Head),
            "headbottom" => Ok(Self::HeadBottom),
            "bodytop" => Ok(Self::BodyTop),
            "bodybottom" => Ok(Self::BodyBottom),
            other => Err(format!("unknown injection location '{}'", other)),
        }
    }
}

impl std::fmt::Display for InjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of link emitted for an injected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Css,
    Js,
}

/// A resource a widget wants linked from the page being rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLink {
    pub kind: LinkKind,
    pub module: String,
    pub filename: String,
    /// Overrides the configured injection location.
    pub location: Option<InjectLocation>,
}

impl ResourceLink {
    pub fn css(module: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::new(LinkKind::Css, module, filename)
    }

    pub fn js(module: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::new(LinkKind::Js, module, filename)
    }

    fn new(kind: LinkKind, module: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.into(),
            filename: filename.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: InjectLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// The registration that makes this link servable.
    pub fn registration(&self) -> ResourceRegistration {
        ResourceRegistration::new(self.module.clone(), self.filename.clone(), false)
    }
}
