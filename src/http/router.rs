//! Handler registry (spec §4.G): `(methods, path-pattern) -> handler`,
//! first-match-wins. Path patterns use `{name}` segments, e.g. `/{db}/{docID}`.
use std::collections::HashMap;
use std::sync::Arc;

use super::request::{Method, Request};
use super::response::Response;

pub type Handler = Arc<dyn Fn(&Request, &HashMap<String, String>) -> Response + Send + Sync>;

struct Route {
    methods: Vec<Method>,
    segments: Vec<Segment>,
    handler: Handler,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

fn compile_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

fn match_path(segments: &[Segment], path: &str) -> Option<HashMap<String, String>> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() != segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (seg, part) in segments.iter().zip(parts.iter()) {
        match seg {
            Segment::Literal(lit) => {
                if lit != part {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), part.to_string());
            }
        }
    }
    Some(params)
}

/// Holds registered routes and dispatches a [`Request`] to the first match,
/// as the listener's step 3 (spec §4.G) requires.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router { routes: Vec::new() }
    }

    pub fn add(&mut self, methods: &[Method], pattern: &str, handler: Handler) {
        self.routes.push(Route { methods: methods.to_vec(), segments: compile_pattern(pattern), handler });
    }

    /// Returns `None` on no match (the caller responds 404).
    pub fn dispatch(&self, req: &Request) -> Option<Response> {
        for route in &self.routes {
            if !route.methods.contains(&req.method) {
                continue;
            }
            if let Some(params) = match_path(&route.segments, &req.path) {
                return Some((route.handler)(req, &params));
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap as Map;

    fn req(method: Method, path: &str) -> Request {
        Request { method, path: path.into(), query: Map::new(), headers: Map::new(), body: Vec::new() }
    }

    #[test]
    fn matches_literal_and_param_segments() {
        let mut router = Router::new();
        router.add(&[Method::Get], "/{db}/{docID}", Arc::new(|_, params| {
            Response::json(&serde_json::json!({"db": params["db"], "doc": params["docID"]}))
        }));
        let resp = router.dispatch(&req(Method::Get, "/mydb/doc1")).unwrap();
        assert_eq!(resp.status, 200);
    }

    #[test]
    fn no_match_returns_none() {
        let router = Router::new();
        assert!(router.dispatch(&req(Method::Get, "/nope")).is_none());
    }

    #[test]
    fn method_mismatch_is_not_a_match() {
        let mut router = Router::new();
        router.add(&[Method::Put], "/{db}", Arc::new(|_, _| Response::new(200)));
        assert!(router.dispatch(&req(Method::Get, "/mydb")).is_none());
    }

    #[test]
    fn first_registered_rule_wins_on_overlap() {
        let mut router = Router::new();
        router.add(&[Method::Get], "/_all_dbs", Arc::new(|_, _| Response::new(1)));
        router.add(&[Method::Get], "/{db}", Arc::new(|_, _| Response::new(2)));
        let resp = router.dispatch(&req(Method::Get, "/_all_dbs")).unwrap();
        assert_eq!(resp.status, 1);
    }
}
