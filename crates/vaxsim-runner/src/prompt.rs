//! Prompt template loading and rendering via `minijinja`.
//!
//! The templates ship inside the binary, so a run needs no files beyond
//! its data. [`PromptEngine::from_dir`] lets operators override any of them
//! from a directory of `.j2` files (same names) without recompiling;
//! missing files keep the built-in version.
//!
//! Context values are plain `serde_json::Value`s assembled by the
//! orchestrator; templates are lenient about missing keys.

use std::path::Path;

use minijinja::Environment;

use crate::error::RunnerError;

/// Templates the orchestrator renders directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    /// Persona, history, risk, policy and reflections.
    System,
    /// First attitude poll.
    InitialAttitude,
    /// Every later attitude poll.
    Attitude,
    /// News articles and policy announcements, asking for lessons.
    NewsAndPolicy,
    /// Recommended posts, asking for lessons.
    Tweets,
    /// Asking the agent to write a post.
    Action,
    /// Weekly disease-risk announcement.
    DiseaseBroadcast,
}

impl PromptTemplate {
    /// Every directly rendered template.
    pub const ALL: [Self; 7] = [
        Self::System,
        Self::InitialAttitude,
        Self::Attitude,
        Self::NewsAndPolicy,
        Self::Tweets,
        Self::Action,
        Self::DiseaseBroadcast,
    ];

    /// Name the template is registered under.
    pub const fn name(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::InitialAttitude => "initial_attitude",
            Self::Attitude => "attitude",
            Self::NewsAndPolicy => "news_policy",
            Self::Tweets => "tweets",
            Self::Action => "action",
            Self::DiseaseBroadcast => "disease_broadcast",
        }
    }

    const fn builtin(self) -> &'static str {
        match self {
            Self::System => include_str!("../templates/system.j2"),
            Self::InitialAttitude => include_str!("../templates/initial_attitude.j2"),
            Self::Attitude => include_str!("../templates/attitude.j2"),
            Self::NewsAndPolicy => include_str!("../templates/news_policy.j2"),
            Self::Tweets => include_str!("../templates/tweets.j2"),
            Self::Action => include_str!("../templates/action.j2"),
            Self::DiseaseBroadcast => include_str!("../templates/disease_broadcast.j2"),
        }
    }
}

/// Fragments included by other templates.
const PARTIALS: [(&str, &str); 3] = [
    ("risk_levels", include_str!("../templates/risk_levels.j2")),
    ("rating_scale", include_str!("../templates/rating_scale.j2")),
    ("lesson_format", include_str!("../templates/lesson_format.j2")),
];

/// Loaded prompt templates.
#[derive(Clone)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    /// Engine with the built-in templates only.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Template`] if a built-in template fails to
    /// compile.
    pub fn builtin() -> Result<Self, RunnerError> {
        let mut env = Environment::new();
        for (name, source) in PARTIALS {
            env.add_template(name, source)
                .map_err(|e| RunnerError::Template(format!("failed to add {name} template: {e}")))?;
        }
        for template in PromptTemplate::ALL {
            let name = template.name();
            env.add_template(name, template.builtin())
                .map_err(|e| RunnerError::Template(format!("failed to add {name} template: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Built-in templates, overridden by any `<name>.j2` found in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Template`] if an override cannot be read or
    /// does not compile.
    pub fn from_dir(dir: &Path) -> Result<Self, RunnerError> {
        let mut engine = Self::builtin()?;
        let names = PARTIALS
            .iter()
            .map(|(name, _)| *name)
            .chain(PromptTemplate::ALL.iter().map(|t| t.name()));
        for name in names {
            let path = dir.join(format!("{name}.j2"));
            if !path.is_file() {
                continue;
            }
            let source = std::fs::read_to_string(&path).map_err(|e| {
                RunnerError::Template(format!("failed to read {}: {e}", path.display()))
            })?;
            engine
                .env
                .add_template_owned(name, source)
                .map_err(|e| RunnerError::Template(format!("failed to add {name} override: {e}")))?;
            tracing::info!(template = name, path = %path.display(), "loaded prompt override");
        }
        Ok(engine)
    }

    /// Render a template with the given context, trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Template`] if rendering fails.
    pub fn render(
        &self,
        template: PromptTemplate,
        context: &serde_json::Value,
    ) -> Result<String, RunnerError> {
        let name = template.name();
        let rendered = self
            .env
            .get_template(name)
            .map_err(|e| RunnerError::Template(format!("missing {name} template: {e}")))?
            .render(context)
            .map_err(|e| RunnerError::Template(format!("{name} render failed: {e}")))?;
        Ok(rendered.trim().to_owned())
    }
}
