//! Route table mapping batch targets to commands.

use http::Method;

/// The command a batch item addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub action_name: String,
    pub entity_name: String,
    pub entity_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Id,
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    segments: Vec<Segment>,
    query: Vec<(String, String)>,
    action_name: String,
    entity_name: String,
}

impl Route {
    fn matches(
        &self,
        method: &str,
        path: &[&str],
        query: &[(&str, &str)],
    ) -> Option<ResolvedRoute> {
        if !self.method.as_str().eq_ignore_ascii_case(method) || self.segments.len() != path.len() {
            return None;
        }

        let mut entity_id = None;
        for (segment, part) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Id => entity_id = Some(part.parse::<i64>().ok()?),
            }
        }

        let satisfied = self
            .query
            .iter()
            .all(|(k, v)| query.iter().any(|(qk, qv)| qk == k && qv == v));
        if !satisfied {
            return None;
        }

        Some(ResolvedRoute {
            action_name: self.action_name.clone(),
            entity_name: self.entity_name.clone(),
            entity_id,
        })
    }
}

/// Ordered `(method, path template)` → `(action, entity)` table.
///
/// Templates look like `savingsaccounts/{id}/transactions?command=deposit`:
/// `{id}` captures the numeric entity id and every query pair is required.
/// The first matching route wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        method: Method,
        template: &str,
        action_name: &str,
        entity_name: &str,
    ) -> Self {
        let (path, query) = split_url(template);
        self.routes.push(Route {
            method,
            segments: path
                .iter()
                .map(|part| match *part {
                    "{id}" => Segment::Id,
                    literal => Segment::Literal(literal.to_string()),
                })
                .collect(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            action_name: action_name.to_string(),
            entity_name: entity_name.to_string(),
        });
        self
    }

    pub fn resolve(&self, method: &str, relative_url: &str) -> Option<ResolvedRoute> {
        let (path, query) = split_url(relative_url);
        self.routes
            .iter()
            .find_map(|route| route.matches(method, &path, &query))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn split_url(url: &str) -> (Vec<&str>, Vec<(&str, &str)>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let segments = path.split('/').filter(|s| !s.is_empty()).collect();
    let pairs = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();
    (segments, pairs)
}
