use super::ast::Expr;
use super::error::FormulaError;
use super::parser::compile;
use dashmap::DashMap;
use std::sync::Arc;

/// 公式编译缓存
///
/// 编译是纯函数 (同一文本总得到同一语法树), 因此可在请求之间、rayon 工作线程之间共享。
/// 编译失败不缓存。
#[derive(Debug, Default)]
pub struct FormulaCache {
    entries: DashMap<String, Arc<Expr>>,
}

impl FormulaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, source: &str) -> Result<Arc<Expr>, FormulaError> {
        if let Some(hit) = self.entries.get(source) {
            return Ok(Arc::clone(hit.value()));
        }
        let expr = Arc::new(compile(source)?);
        tracing::debug!("Compiled formula: {}", source);
        Ok(Arc::clone(
            self.entries
                .entry(source.to_string())
                .or_insert(expr)
                .value(),
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_text_shares_ast() {
        let cache = FormulaCache::new();
        let a = cache.get_or_compile("usage.qty * 2").unwrap();
        let b = cache.get_or_compile("usage.qty * 2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = FormulaCache::new();
        assert!(cache.get_or_compile("usage.qty *").is_err());
        assert!(cache.is_empty());
    }
}
