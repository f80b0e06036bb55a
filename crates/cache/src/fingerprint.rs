//! Fingerprint builder
//!
//! Derives the composite cache key from an analyzed query, and rejects
//! queries whose plans can never be shared: references to session-local
//! storage, relations with rewrite rules beyond a simple view's single
//! `_RETURN` rule, functions the current user cannot execute, and utility
//! statements.
//!
//! `query_id` comes from the host's normalizer, which deliberately ignores
//! literal values and a handful of result-shaping details. Everything the
//! normalizer omits but the result can depend on is folded into
//! `const_id`: constant literals, alias column names, output column names,
//! the inheritance flag, the limit modality, grouping level, XML element
//! names and parameter collations.

use crate::config::Config;
use crate::key::{hash_bytes, hash_combine, CacheKey};
use crate::session::Session;
use plancache_host::{
    Expr, Host, LimitModality, Query, RangeTableKind, RelationKind, RelationPersistence, Syscache,
};

pub(crate) struct Fingerprint {
    pub key: CacheKey,
    pub num_const: usize,
}

struct Walker<'a> {
    syscache: &'a dyn Syscache,
    user: Option<plancache_host::Oid>,
    const_id: u32,
    num_const: usize,
}

impl Walker<'_> {
    fn fold(&mut self, value: u32) {
        self.const_id = hash_combine(self.const_id, value);
    }

    fn fold_str(&mut self, value: &str) {
        self.const_id = hash_combine(self.const_id, hash_bytes(value.as_bytes()));
    }

    /// Returns true when the query cannot be cached.
    fn walk_query(&mut self, query: &Query) -> bool {
        for rte in &query.range_table {
            match &rte.kind {
                RangeTableKind::Relation { relid, .. } => {
                    match self.syscache.relation_persistence(*relid) {
                        Some(RelationPersistence::Session) => return true,
                        Some(RelationPersistence::Permanent) => {}
                        None => return true,
                    }

                    // The normalizer computes one query_id for queries
                    // rewritten through rules, so only a simple view with
                    // its single _RETURN rule is safe to share.
                    let rules = self.syscache.relation_rule_count(*relid);
                    if rules > 0 {
                        if self.syscache.relation_kind(*relid) != Some(RelationKind::View) {
                            return true;
                        }
                        if rules > 1 {
                            return true;
                        }
                    }
                }
                RangeTableKind::Subquery(sub) => {
                    if self.walk_query(sub) {
                        return true;
                    }
                }
            }

            self.fold(rte.inherit as u32);

            // Alias column names change the result of things like
            // row_to_json() even though the normalizer ignores them.
            for column in &rte.alias_columns {
                self.fold_str(column);
            }
        }

        for te in &query.target_list {
            if let Some(name) = &te.name {
                self.fold_str(name);
            }
            if self.walk_expr(&te.expr) {
                return true;
            }
        }

        if let Some(quals) = &query.quals {
            if self.walk_expr(quals) {
                return true;
            }
        }

        if let Some(limit) = &query.limit {
            self.fold(match limit.modality {
                LimitModality::Only => 0,
                LimitModality::WithTies => 1,
            });
            if self.walk_expr(&limit.count) {
                return true;
            }
        }

        false
    }

    fn walk_expr(&mut self, expr: &Expr) -> bool {
        match expr {
            Expr::Const { text } => {
                self.fold_str(text);
                self.num_const += 1;
                false
            }
            Expr::Param { collation, .. } => {
                if let Some(collation) = collation {
                    self.fold(collation.0);
                }
                false
            }
            Expr::Column { .. } => false,
            Expr::Op { args, .. } => args.iter().any(|arg| self.walk_expr(arg)),
            Expr::FuncCall { func, args } => {
                // The query is going to error out; reject now and let the
                // host raise the permission error on the real path.
                if !self.syscache.function_is_executable(*func, self.user) {
                    return true;
                }
                args.iter().any(|arg| self.walk_expr(arg))
            }
            Expr::Cast { arg, .. } => self.walk_expr(arg),
            Expr::Grouping { level, args } => {
                self.fold(*level);
                args.iter().any(|arg| self.walk_expr(arg))
            }
            Expr::Xml { element_name, args } => {
                if let Some(name) = element_name {
                    self.fold_str(name);
                }
                args.iter().any(|arg| self.walk_expr(arg))
            }
            Expr::Subquery(sub) => self.walk_query(sub),
        }
    }
}

/// Build the cache key for an analyzed query, or `None` when the query is
/// not cacheable.
pub(crate) fn build(
    host: &Host,
    session: &Session,
    query: &Query,
    config: &Config,
) -> Option<Fingerprint> {
    if query.is_utility() {
        return None;
    }

    let mut walker = Walker {
        syscache: host.syscache.as_ref(),
        user: Some(session.user()),
        const_id: 0,
        num_const: 0,
    };

    if walker.walk_query(query) {
        return None;
    }

    if config.cache_all {
        // Without bound parameters the host's own plan cache never
        // revalidates the result descriptor for us, so fold it in:
        // output arity and column names stand in for the row type.
        walker.fold(query.target_list.len() as u32);
        for te in &query.target_list {
            if let Some(name) = &te.name {
                walker.fold_str(name);
            }
        }
    }

    // One entry per user only when row-level security makes the result
    // user-dependent.
    let user_id = if query.has_row_security {
        Some(session.user())
    } else {
        None
    };

    Some(Fingerprint {
        key: CacheKey {
            user_id,
            database_id: host.database,
            query_id: query.query_id,
            const_id: walker.const_id,
        },
        num_const: walker.num_const,
    })
}
