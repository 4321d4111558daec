// src/template.rs
//! Canonical template model shared by every pipeline stage.
//!
//! A [`Template`] carries the fields common to all kinds plus a [`TemplateSpec`]
//! holding only what is valid for its kind (image/ports/volumes for containers,
//! a git repository for stacks). Records are immutable once normalized; the
//! deduplicator picks winners, it never edits them.
//!
//! Serializing a `Template` yields the Portainer-style JSON written to the merged
//! artifact. Reading that artifact back goes through the normalizer again.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A `type` value from source data that does not name a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DeclaredType {
    /// Integer outside 1..=3.
    Code(i64),
    /// Anything that is not an integer, kept as text.
    Invalid(String),
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Code(c) => write!(f, "{c}"),
            DeclaredType::Invalid(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateKind {
    Container,
    Swarm,
    Stack,
}

impl TemplateKind {
    pub fn code(self) -> i64 {
        match self {
            TemplateKind::Container => 1,
            TemplateKind::Swarm => 2,
            TemplateKind::Stack => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TemplateKind::Container),
            2 => Some(TemplateKind::Swarm),
            3 => Some(TemplateKind::Stack),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TemplateKind::Container => "container",
            TemplateKind::Swarm => "swarm",
            TemplateKind::Stack => "stack",
        }
    }
}

/// Target platform. Unknown values are kept verbatim so validation can flag them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    Other(String),
}

impl Platform {
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if t.eq_ignore_ascii_case("linux") {
            Platform::Linux
        } else if t.eq_ignore_ascii_case("windows") {
            Platform::Windows
        } else {
            Platform::Other(t.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Platform::Other(_))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
}

/// The externally visible environment variable shape: `name` and `label` are always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub url: String,
    pub stackfile: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceAttribution {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub ports: Vec<String>,
    pub volumes: Vec<Volume>,
    pub restart_policy: Option<String>,
    pub command: Option<String>,
    pub hostname: Option<String>,
    pub network: Option<String>,
    pub privileged: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSpec {
    pub repository: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSpec {
    Container(ContainerSpec),
    Swarm(ContainerSpec),
    Stack(StackSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub title: String,
    pub name: Option<String>,
    pub description: String,
    pub note: Option<String>,
    /// First-seen order, duplicates removed. The first entry is the primary category.
    pub categories: Vec<String>,
    pub platform: Option<Platform>,
    pub logo: Option<String>,
    pub env: Vec<EnvVar>,
    /// Set only when the source `type` is not a known kind code; `kind()` is then Container.
    pub declared_type: Option<DeclaredType>,
    pub spec: TemplateSpec,
    pub source: SourceAttribution,
    pub dedup_key: String,
}

/// Dedup key of a title: trimmed and lower-cased.
pub fn dedup_key(title: &str) -> String {
    title.trim().to_lowercase()
}

impl Template {
    pub fn kind(&self) -> TemplateKind {
        match self.spec {
            TemplateSpec::Container(_) => TemplateKind::Container,
            TemplateSpec::Swarm(_) => TemplateKind::Swarm,
            TemplateSpec::Stack(_) => TemplateKind::Stack,
        }
    }

    pub fn container(&self) -> Option<&ContainerSpec> {
        match &self.spec {
            TemplateSpec::Container(c) | TemplateSpec::Swarm(c) => Some(c),
            TemplateSpec::Stack(_) => None,
        }
    }

    pub fn image(&self) -> Option<&str> {
        self.container().map(|c| c.image.as_str())
    }

    pub fn ports(&self) -> &[String] {
        self.container().map(|c| c.ports.as_slice()).unwrap_or(&[])
    }

    pub fn repository(&self) -> Option<&Repository> {
        match &self.spec {
            TemplateSpec::Stack(s) => Some(&s.repository),
            _ => None,
        }
    }

    pub fn primary_category(&self) -> &str {
        self.categories.first().map(String::as_str).unwrap_or("")
    }

    /// `type` written to the artifact: an unrecognized declared value when there
    /// is one, so it survives a round trip; otherwise the kind's code.
    pub fn type_code(&self) -> DeclaredType {
        self.declared_type
            .clone()
            .unwrap_or_else(|| DeclaredType::Code(self.kind().code()))
    }
}

fn is_empty_slice<T>(s: &&[T]) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
struct TemplateOut<'a> {
    #[serde(rename = "type")]
    type_code: DeclaredType,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
    categories: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logo: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<&'a Repository>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    ports: &'a [String],
    #[serde(skip_serializing_if = "is_empty_slice")]
    volumes: &'a [Volume],
    env: &'a [EnvVar],
    #[serde(skip_serializing_if = "Option::is_none")]
    restart_policy: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    privileged: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    interactive: bool,
    #[serde(rename = "_source")]
    source: &'a SourceAttribution,
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let c = self.container();
        let out = TemplateOut {
            type_code: self.type_code(),
            title: &self.title,
            name: self.name.as_deref(),
            description: &self.description,
            note: self.note.as_deref(),
            categories: &self.categories,
            platform: self.platform.as_ref().map(Platform::as_str),
            logo: self.logo.as_deref(),
            image: c.map(|c| c.image.as_str()),
            repository: self.repository(),
            ports: c.map(|c| c.ports.as_slice()).unwrap_or(&[]),
            volumes: c.map(|c| c.volumes.as_slice()).unwrap_or(&[]),
            env: &self.env,
            restart_policy: c.and_then(|c| c.restart_policy.as_deref()),
            command: c.and_then(|c| c.command.as_deref()),
            hostname: c.and_then(|c| c.hostname.as_deref()),
            network: c.and_then(|c| c.network.as_deref()),
            privileged: c.is_some_and(|c| c.privileged),
            interactive: c.is_some_and(|c| c.interactive),
            source: &self.source,
        };
        out.serialize(serializer)
    }
}
