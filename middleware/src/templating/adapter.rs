//! Cross-engine render adaptors.
//!
//! A template written for one engine (the source) is often embedded in a
//! template of another (the destination). Destinations disagree on what an
//! embeddable value is, so the output is coerced with [`Embedding`]. Every
//! supported `(source, destination)` pairing maps to one [`Adaptor`]:
//!
//! | source               | destination      | adaptor                 |
//! |----------------------|------------------|-------------------------|
//! | string, toscawidgets | any              | `Substitute`            |
//! | kid / genshi         | same engine      | `Transform`             |
//! | mako                 | any              | `Template(embedding)`   |
//! | kid                  | genshi           | `Retree`                |
//! | any other            | any              | `Render(embedding)`     |

use widgetry_common::{EngineError, Fragment, Markup, Rendered};

/// What a source engine is, as far as adaptation is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The reference is the template text itself.
    Literal,
    Mako,
    Kid,
    Genshi,
    Other,
}

impl SourceKind {
    pub fn of(engine: &str) -> Self {
        match engine {
            "string" | "toscawidgets" => Self::Literal,
            "mako" => Self::Mako,
            "kid" => Self::Kid,
            "genshi" => Self::Genshi,
            _ => Self::Other,
        }
    }

    /// Whether the engine loads templates before rendering.
    pub fn loads_templates(engine: &str) -> bool {
        !matches!(engine, "string" | "toscawidgets" | "cheetah")
    }
}

/// How rendered output is embedded in a destination engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Embedding {
    /// Plain text.
    Raw,
    /// Markup flagged as safe so it is not escaped again.
    Markup,
    /// A parsed tree.
    Tree,
}

impl Embedding {
    pub fn of(engine: &str) -> Self {
        match engine {
            "genshi" => Self::Markup,
            "kid" => Self::Tree,
            _ => Self::Raw,
        }
    }

    pub fn wrap(self, rendered: Rendered) -> Result<Rendered, EngineError> {
        Ok(match self {
            Self::Raw => rendered,
            Self::Markup => Rendered::Markup(Markup::new(rendered.into_text()?)),
            Self::Tree => Rendered::Fragment(Fragment::parse(&rendered.into_text()?)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptor {
    /// Substitute the `w` variables into the literal template text.
    Substitute,
    /// Let the engine produce its own embeddable form.
    Transform,
    /// Render the loaded template with the variables as top-level names.
    Template(Embedding),
    /// Transform, then re-parse into the destination's tree.
    Retree,
    /// Render through the engine by template path.
    Render(Embedding),
}

impl Adaptor {
    pub fn select(source: &str, destination: &str) -> Self {
        match (SourceKind::of(source), Embedding::of(destination)) {
            (SourceKind::Literal, _) => Self::Substitute,
            (SourceKind::Kid | SourceKind::Genshi, _) if source == destination => Self::Transform,
            (SourceKind::Mako, embedding) => Self::Template(embedding),
            (SourceKind::Kid, Embedding::Markup) => Self::Retree,
            (_, embedding) => Self::Render(embedding),
        }
    }
}
