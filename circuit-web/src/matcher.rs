//! 路由匹配
//!
//! 路由模式支持 `{name}` 和 `{name:regex}` 两种占位符，
//! 默认占位符匹配一个不含 `/` 的路径段。路由按声明顺序尝试，先匹配先得

use crate::exception::RouterError;
use crate::handler::HandlerDescriptor;
use crate::route_collector::RouteTable;
use http::Method;
use regex::{Captures, Regex};
use std::sync::Arc;

/// 匹配结果
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found {
        descriptor: Arc<HandlerDescriptor>,
        pattern: String,
        /// 按占位符在模式中出现的顺序
        params: Vec<(String, String)>,
    },
    NotFound,
    /// 路径存在但方法不被允许，`allowed` 为大写方法名
    MethodNotAllowed { allowed: Vec<String> },
}

/// 匹配引擎 trait
pub trait RouteMatcher: Send + Sync {
    fn find(&self, method: &Method, path: &str) -> RouteMatch;
}

struct CompiledRoute {
    methods: Vec<Method>,
    pattern: String,
    regex: Regex,
    param_names: Vec<String>,
    descriptor: Arc<HandlerDescriptor>,
}

impl CompiledRoute {
    fn found(&self, captures: &Captures<'_>) -> RouteMatch {
        let params = self
            .param_names
            .iter()
            .enumerate()
            .filter_map(|(index, name)| {
                captures
                    .name(&format!("p{}", index))
                    .map(|value| (name.clone(), value.as_str().to_string()))
            })
            .collect();

        RouteMatch::Found {
            descriptor: Arc::clone(&self.descriptor),
            pattern: self.pattern.clone(),
            params,
        }
    }
}

/// 基于正则表达式的匹配引擎
pub struct PatternMatcher {
    routes: Vec<CompiledRoute>,
}

impl PatternMatcher {
    /// 编译路由表，任一模式非法时失败
    pub fn compile(table: &RouteTable) -> Result<Self, RouterError> {
        let routes = table
            .routes()
            .iter()
            .map(|route| {
                let (regex, param_names) = compile_pattern(route.pattern())?;
                Ok(CompiledRoute {
                    methods: route.methods().to_vec(),
                    pattern: route.pattern().to_string(),
                    regex,
                    param_names,
                    descriptor: Arc::clone(route.descriptor()),
                })
            })
            .collect::<Result<Vec<_>, RouterError>>()?;

        tracing::debug!(routes = routes.len(), "Route matcher compiled");
        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteMatcher for PatternMatcher {
    /// HEAD 请求没有对应路由时回退到 GET 路由
    fn find(&self, method: &Method, path: &str) -> RouteMatch {
        let mut allowed: Vec<String> = Vec::new();
        let mut get_fallback: Option<(&CompiledRoute, Captures<'_>)> = None;

        for route in &self.routes {
            let Some(captures) = route.regex.captures(path) else {
                continue;
            };

            if route.methods.contains(method) {
                return route.found(&captures);
            }

            if *method == Method::HEAD
                && get_fallback.is_none()
                && route.methods.contains(&Method::GET)
            {
                get_fallback = Some((route, captures));
            }

            for candidate in &route.methods {
                let name = candidate.as_str().to_uppercase();
                if !allowed.contains(&name) {
                    allowed.push(name);
                }
            }
        }

        if let Some((route, captures)) = get_fallback {
            return route.found(&captures);
        }

        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            RouteMatch::MethodNotAllowed { allowed }
        }
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> RouterError {
    RouterError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

/// 把路由模式编译为锚定的正则表达式，返回正则和占位符名称
pub(crate) fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>), RouterError> {
    let mut source = String::with_capacity(pattern.len() + 16);
    source.push('^');
    let mut param_names: Vec<String> = Vec::with_capacity(pattern.matches('{').count());

    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        let literal = &rest[..open];
        if literal.contains('}') {
            return Err(invalid(pattern, "unexpected '}'"));
        }
        source.push_str(&regex::escape(literal));

        // 自定义正则里可能有 `{2}` 这样的量词，按嵌套深度找闭合括号
        let body = &rest[open + 1..];
        let mut depth = 1usize;
        let mut close = None;
        for (index, c) in body.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(index);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| invalid(pattern, "unclosed '{'"))?;

        let placeholder = &body[..close];
        let (name, constraint) = match placeholder.split_once(':') {
            Some((name, constraint)) => (name.trim(), constraint.trim()),
            None => (placeholder.trim(), "[^/]+"),
        };

        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(invalid(pattern, format!("bad placeholder name '{}'", name)));
        }
        if constraint.is_empty() {
            return Err(invalid(pattern, format!("empty constraint for '{}'", name)));
        }
        if param_names.iter().any(|existing| existing == name) {
            return Err(invalid(pattern, format!("duplicate placeholder '{}'", name)));
        }

        source.push_str(&format!("(?P<p{}>{})", param_names.len(), constraint));
        param_names.push(name.to_string());
        rest = &body[close + 1..];
    }

    if rest.contains('}') {
        return Err(invalid(pattern, "unexpected '}'"));
    }
    source.push_str(&regex::escape(rest));
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| invalid(pattern, e.to_string()))?;
    Ok((regex, param_names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_collector::RouteCollector;

    fn matcher(define: impl FnOnce(&mut RouteCollector)) -> PatternMatcher {
        let mut routes = RouteCollector::new();
        define(&mut routes);
        PatternMatcher::compile(&routes.into_table()).unwrap()
    }

    fn found_label(result: RouteMatch) -> (String, Vec<(String, String)>) {
        match result {
            RouteMatch::Found {
                descriptor, params, ..
            } => (descriptor.label(), params),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_static_and_placeholder() {
        let matcher = matcher(|r| {
            r.get("/", "Home@index");
            r.get("/users/{id}", "Users@show");
            r.get("/users/{id}/posts/{post:\\d+}", "Posts@show");
        });

        let (label, params) = found_label(matcher.find(&Method::GET, "/"));
        assert_eq!(label, "Home@index");
        assert!(params.is_empty());

        let (label, params) = found_label(matcher.find(&Method::GET, "/users/42"));
        assert_eq!(label, "Users@show");
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);

        let (_, params) = found_label(matcher.find(&Method::GET, "/users/7/posts/99"));
        assert_eq!(
            params,
            vec![
                ("id".to_string(), "7".to_string()),
                ("post".to_string(), "99".to_string())
            ]
        );

        assert!(matches!(
            matcher.find(&Method::GET, "/users/7/posts/abc"),
            RouteMatch::NotFound
        ));
        assert!(matches!(matcher.find(&Method::GET, "/nope"), RouteMatch::NotFound));
    }

    #[test]
    fn test_first_declared_wins() {
        let matcher = matcher(|r| {
            r.get("/files/{name}", "Files@show");
            r.get("/files/latest", "Files@latest");
        });
        let (label, _) = found_label(matcher.find(&Method::GET, "/files/latest"));
        assert_eq!(label, "Files@show");
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let matcher = matcher(|r| {
            r.get("/users/{id}", "Users@show");
            r.put("/users/{id}", "Users@update");
            r.add_route([Method::GET, Method::DELETE], "/users/{id}", "Users@remove", []);
        });

        match matcher.find(&Method::POST, "/users/1") {
            RouteMatch::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec!["GET", "PUT", "DELETE"]);
            }
            other => panic!("expected 405, got {:?}", other),
        }
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let matcher = matcher(|r| {
            r.get("/status", "Status@show");
            r.head("/ping", "Ping@head");
            r.get("/ping", "Ping@get");
        });
        let (label, _) = found_label(matcher.find(&Method::HEAD, "/status"));
        assert_eq!(label, "Status@show");

        let (label, _) = found_label(matcher.find(&Method::HEAD, "/ping"));
        assert_eq!(label, "Ping@head");
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let matcher = matcher(|r| {
            r.get("/report.json", "Reports@json");
        });
        assert!(matches!(
            matcher.find(&Method::GET, "/report.json"),
            RouteMatch::Found { .. }
        ));
        assert!(matches!(
            matcher.find(&Method::GET, "/reportxjson"),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn test_quantifier_inside_constraint() {
        let (regex, names) = compile_pattern("/archive/{year:\\d{4}}").unwrap();
        assert_eq!(names, vec!["year"]);
        assert!(regex.is_match("/archive/2024"));
        assert!(!regex.is_match("/archive/24"));
    }

    #[test]
    fn test_invalid_patterns() {
        for pattern in ["/users/{id", "/users/id}", "/users/{}", "/a/{x}/b/{x}", "/a/{x:}"] {
            assert!(
                matches!(compile_pattern(pattern), Err(RouterError::InvalidPattern { .. })),
                "pattern {} should be rejected",
                pattern
            );
        }
    }
}
