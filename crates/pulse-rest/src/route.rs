//! Request routes and bucket keys
//!
//! A `Route` is an immutable path built from explicit segments. Its bucket
//! key — not the literal path — identifies the rate-limit bucket: large
//! numeric ids collapse to a placeholder except directly under the two
//! top-level resources that own independent quota spaces, and everything
//! from a `reactions` collection onward shares its parent's bucket.

use pulse_core::Snowflake;

/// HTTP verbs used against the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    /// Canonical verb name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources whose ids stay distinct per bucket
const MAJOR_RESOURCES: [&str; 2] = ["channels", "guilds"];

/// Sub-resource sharing its parent's bucket
const SHARED_SUBRESOURCE: &str = "reactions";

/// An immutable API route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    segments: Vec<String>,
}

impl Route {
    /// Start building a route
    #[must_use]
    pub fn builder() -> RouteBuilder {
        RouteBuilder {
            segments: Vec::new(),
        }
    }

    /// The request path, with a leading slash
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// The rate-limit bucket key for this route
    #[must_use]
    pub fn bucket_key(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.segments.len());

        for (i, segment) in self.segments.iter().enumerate() {
            if segment == SHARED_SUBRESOURCE {
                break;
            }

            let keeps_id = i > 0 && MAJOR_RESOURCES.contains(&self.segments[i - 1].as_str());
            if Self::looks_like_id(segment) && !keeps_id {
                parts.push(":id");
            } else {
                parts.push(segment);
            }
        }

        parts.join("/")
    }

    /// Large numeric identifiers are 16-19 decimal digits
    fn looks_like_id(segment: &str) -> bool {
        (16..=19).contains(&segment.len()) && segment.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Builder for `Route` values
#[derive(Debug, Clone)]
pub struct RouteBuilder {
    segments: Vec<String>,
}

impl RouteBuilder {
    /// Append a fixed path segment (resource name, emoji, "@me", ...)
    #[must_use]
    pub fn segment(mut self, name: impl Into<String>) -> Self {
        self.segments.push(name.into());
        self
    }

    /// Append an entity id segment
    #[must_use]
    pub fn id(mut self, id: Snowflake) -> Self {
        self.segments.push(id.to_string());
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> Route {
        Route {
            segments: self.segments,
        }
    }
}
