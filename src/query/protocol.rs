//! Protocol translator: compiles a [`QueryDescriptor`] into the query
//! options of an OData-style remote service.
//!
//! The output is a [`ProtocolRequest`] carrying one string per well-known
//! option (`filter`, `orderby`, `skip`, `top`, `count`, `select`, `expand`)
//! plus caller-supplied custom parameters. Encoding and transport are left to
//! the caller, though [`ProtocolRequest::append_to_url`] covers the common
//! case.
//!
//! Attribute paths are resolved through the [`MetadataProvider`]: path
//! segments are joined with `/`, the identity field is renamed to the model's
//! primary key, and a master relationship compared to a literal addresses the
//! related key (`Manager/Id eq ...`). Literals are rendered by the declared
//! type of the attribute they are compared with.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::ProtocolConfig;
use crate::error::{QueryError, Result};
use crate::query::date::{DateService, Rfc3339Dates};
use crate::query::descriptor::{QueryDescriptor, SelectTree};
use crate::query::metadata::{
    resolve_detail, resolve_path, AttrType, FieldKind, FieldMeta, KeyType, MetadataProvider,
};
use crate::query::order::OrderByClause;
use crate::query::predicate::{
    Condition, Param, Predicate, Quantifier, SimpleOp, SpatialKind, SpatialOp,
};
use crate::query::value::{Value, ID_FIELD};

/// Compiled query options. Absent options are `None` (or `false` for
/// `count`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtocolRequest {
    /// Filter expression.
    pub filter: Option<String>,
    /// Comma-separated sort keys.
    pub orderby: Option<String>,
    /// Number of records to skip.
    pub skip: Option<usize>,
    /// Maximum number of records.
    pub top: Option<usize>,
    /// Request the total count.
    pub count: bool,
    /// Root-level select list.
    pub select: Option<String>,
    /// Expand list with nested options.
    pub expand: Option<String>,
    /// Custom parameters, emitted after the well-known ones.
    pub custom: BTreeMap<String, String>,
    /// Prefix of the well-known keys, `$` by default.
    pub key_prefix: String,
}

impl ProtocolRequest {
    /// Key/value pairs in emission order. Only present options are listed.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let key = |name: &str| format!("{}{name}", self.key_prefix);
        let mut pairs = Vec::new();
        if let Some(filter) = &self.filter {
            pairs.push((key("filter"), filter.clone()));
        }
        if let Some(orderby) = &self.orderby {
            pairs.push((key("orderby"), orderby.clone()));
        }
        if let Some(skip) = self.skip {
            pairs.push((key("skip"), skip.to_string()));
        }
        if let Some(top) = self.top {
            pairs.push((key("top"), top.to_string()));
        }
        if self.count {
            pairs.push((key("count"), "true".to_owned()));
        }
        if let Some(select) = &self.select {
            pairs.push((key("select"), select.clone()));
        }
        if let Some(expand) = &self.expand {
            pairs.push((key("expand"), expand.clone()));
        }
        pairs.extend(self.custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    /// Percent-encoded query string without the leading `?`.
    pub fn to_query_string(&self) -> String {
        self.to_query_pairs()
            .iter()
            .map(|(k, v)| format!("{}={}", self.encode_key(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Appends the query string to `base`.
    pub fn append_to_url(&self, base: &str) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            return base.to_owned();
        }
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}{query}")
    }

    fn encode_key(&self, key: &str) -> String {
        match key.strip_prefix(self.key_prefix.as_str()) {
            Some(rest) if !self.key_prefix.is_empty() => {
                format!("{}{}", self.key_prefix, urlencoding::encode(rest))
            }
            _ => urlencoding::encode(key).into_owned(),
        }
    }
}

/// Lambda scope of a filter fragment.
#[derive(Debug)]
struct Scope<'a> {
    entity_type: &'a str,
    variable: Option<String>,
    depth: usize,
}

impl<'a> Scope<'a> {
    fn root(entity_type: &'a str) -> Self {
        Self {
            entity_type,
            variable: None,
            depth: 0,
        }
    }

    fn qualify(&self, path: String) -> String {
        match &self.variable {
            Some(var) => format!("{var}/{path}"),
            None => path,
        }
    }
}

/// One rendered side of a comparison.
enum Side<'p> {
    Attribute {
        param: &'p Param,
        text: String,
        /// Field whose type drives literal formatting on the other side.
        literal_meta: FieldMeta,
    },
    Literal(&'p Param, &'p Value),
}

impl<'p> Side<'p> {
    fn param(&self) -> &'p Param {
        match self {
            Side::Attribute { param, .. } | Side::Literal(param, _) => param,
        }
    }
}

/// Compiles descriptors into [`ProtocolRequest`]s.
#[derive(Clone)]
pub struct ProtocolTranslator {
    metadata: Arc<dyn MetadataProvider>,
    dates: Arc<dyn DateService>,
    config: ProtocolConfig,
}

impl ProtocolTranslator {
    /// Creates a translator using RFC 3339 dates.
    pub fn new(metadata: Arc<dyn MetadataProvider>, config: ProtocolConfig) -> Self {
        Self::with_date_service(metadata, config, Arc::new(Rfc3339Dates))
    }

    /// Creates a translator with a custom date service.
    pub fn with_date_service(
        metadata: Arc<dyn MetadataProvider>,
        config: ProtocolConfig,
        dates: Arc<dyn DateService>,
    ) -> Self {
        Self {
            metadata,
            dates,
            config,
        }
    }

    /// Compiles every query option of `descriptor`.
    pub fn compile(&self, descriptor: &QueryDescriptor) -> Result<ProtocolRequest> {
        let entity_type = descriptor.entity_type.as_str();
        let filter = descriptor
            .effective_predicate()
            .map(|predicate| self.compile_filter(entity_type, &predicate))
            .transpose()?;
        let orderby = descriptor
            .order
            .as_ref()
            .map(|order| self.compile_order(entity_type, order))
            .transpose()?;
        let tree = descriptor.fetch_tree();
        let select = self.select_list(&tree)?;
        let expand = self.expand_list(&tree)?;

        let request = ProtocolRequest {
            filter,
            orderby,
            skip: descriptor.skip,
            top: descriptor.top,
            count: descriptor.count,
            select: non_empty(select),
            expand: non_empty(expand),
            custom: descriptor.custom_params.clone(),
            key_prefix: self.config.param_prefix.clone(),
        };
        debug!(
            entity = entity_type,
            filter = request.filter.as_deref().unwrap_or_default(),
            "query.protocol.compile"
        );
        Ok(request)
    }

    /// Resource URL of the queried collection, including a derived-type cast
    /// segment when the descriptor restricts the data type, followed by the
    /// compiled query string.
    pub fn url(&self, base: &str, descriptor: &QueryDescriptor) -> Result<String> {
        let model = self.metadata.model(&descriptor.entity_type)?;
        let collection = model
            .remote_name
            .clone()
            .unwrap_or_else(|| self.config.name_case.apply(&model.name));
        let mut resource = format!("{}/{collection}", base.trim_end_matches('/'));
        if let Some(data_type) = &descriptor.data_type {
            resource.push('/');
            resource.push_str(&self.config.qualify(data_type));
        }
        Ok(self.compile(descriptor)?.append_to_url(&resource))
    }

    /// Compiles a predicate tree against `entity_type`.
    pub fn compile_filter(&self, entity_type: &str, predicate: &Predicate) -> Result<String> {
        self.filter(predicate, &Scope::root(entity_type), 0)
    }

    /// Compiles an ordering clause.
    pub fn compile_order(&self, entity_type: &str, order: &OrderByClause) -> Result<String> {
        let scope = Scope::root(entity_type);
        let mut keys = Vec::with_capacity(order.len());
        for item in order.items() {
            let (path, _) = self.attribute(&scope, &item.path)?;
            keys.push(match item.direction {
                Some(direction) => format!("{path} {}", direction.as_str()),
                None => path,
            });
        }
        Ok(keys.join(","))
    }

    fn filter(&self, predicate: &Predicate, scope: &Scope<'_>, level: usize) -> Result<String> {
        match predicate {
            Predicate::Simple(simple) => {
                self.comparison(scope, &simple.left, simple.op, &simple.right, None)
            }
            Predicate::Date(date) => {
                self.comparison(scope, &date.left, date.op, &date.right, Some(date.timeless))
            }
            Predicate::String(string) => {
                let (path, _) = self.attribute(scope, &string.path)?;
                if self.config.case_insensitive_contains {
                    Ok(format!(
                        "contains(tolower({path}),{})",
                        quote(&string.contains.to_lowercase())
                    ))
                } else {
                    Ok(format!("contains({path},{})", quote(&string.contains)))
                }
            }
            Predicate::Spatial(spatial) => {
                let (path, _) = self.attribute(scope, &spatial.path)?;
                let flavor = match spatial.kind {
                    SpatialKind::Geography => "geography",
                    SpatialKind::Geometry => "geometry",
                };
                match &spatial.op {
                    SpatialOp::Intersects { value } => Ok(format!(
                        "geo.intersects({path},{flavor}'{value}')"
                    )),
                    SpatialOp::Distance {
                        value,
                        op,
                        distance,
                    } => Ok(format!(
                        "geo.distance({path},{flavor}'{value}') {} {distance}",
                        operator(*op)
                    )),
                }
            }
            Predicate::Not(inner) => Ok(format!("not ({})", self.filter(inner, scope, 0)?)),
            Predicate::IsOf(is_of) => {
                let type_name = quote(&self.config.qualify(&is_of.type_name));
                match &is_of.expression {
                    None => match &scope.variable {
                        Some(variable) => Ok(format!("isof({variable},{type_name})")),
                        None => Ok(format!("isof({type_name})")),
                    },
                    Some(expression) => {
                        let (path, _) = self.attribute(scope, expression)?;
                        Ok(format!("isof({path},{type_name})"))
                    }
                }
            }
            Predicate::Complex(group) => {
                let separator = match group.condition() {
                    Condition::And => " and ",
                    Condition::Or => " or ",
                };
                let parts = group
                    .predicates()
                    .iter()
                    .map(|child| self.filter(child, scope, level + 1))
                    .collect::<Result<Vec<_>>>()?;
                let joined = parts.join(separator);
                if level == 0 {
                    Ok(joined)
                } else {
                    Ok(format!("({joined})"))
                }
            }
            Predicate::Detail(detail) => {
                let meta = resolve_detail(self.metadata.as_ref(), scope.entity_type, &detail.path)?;
                let (path, _) = self.attribute(scope, &detail.path)?;
                let variable = format!("{}{}", self.config.lambda_prefix, scope.depth);
                let target = meta.target_type.unwrap_or_default();
                let inner_scope = Scope {
                    entity_type: &target,
                    variable: Some(variable.clone()),
                    depth: scope.depth + 1,
                };
                let body = self.filter(&detail.predicate, &inner_scope, 0)?;
                let quantifier = match detail.quantifier {
                    Quantifier::All => "all",
                    Quantifier::Any => "any",
                };
                Ok(format!("{path}/{quantifier}({variable}:{body})"))
            }
            Predicate::True => Ok("true".to_owned()),
            Predicate::False => Ok("false".to_owned()),
        }
    }

    fn comparison(
        &self,
        scope: &Scope<'_>,
        left: &Param,
        op: SimpleOp,
        right: &Param,
        timeless: Option<bool>,
    ) -> Result<String> {
        let left = self.side(scope, left, right, timeless)?;
        let right = self.side(scope, right, left.param(), timeless)?;
        let lhs = self.render(&left, &right, timeless)?;
        let rhs = self.render(&right, &left, timeless)?;
        Ok(format!("{lhs} {} {rhs}", operator(op)))
    }

    fn side<'p>(
        &self,
        scope: &Scope<'_>,
        param: &'p Param,
        other: &Param,
        timeless: Option<bool>,
    ) -> Result<Side<'p>> {
        let path = match param {
            Param::Const(value) => return Ok(Side::Literal(param, value)),
            Param::Attribute(path) => path,
        };
        let (mut text, meta) = self.attribute(scope, path)?;
        let compared_to_literal = matches!(other, Param::Const(v) if !v.is_null());
        let literal_meta = if meta.kind == FieldKind::BelongsTo && compared_to_literal {
            let target = meta.target_type.as_deref().unwrap_or_default();
            let key = self.metadata.resolve(target, ID_FIELD)?;
            text = format!("{text}/{}", self.remote_name(&key));
            key
        } else {
            meta
        };
        if timeless == Some(true) {
            text = format!("date({text})");
        }
        Ok(Side::Attribute {
            param,
            text,
            literal_meta,
        })
    }

    fn render(&self, side: &Side<'_>, other: &Side<'_>, timeless: Option<bool>) -> Result<String> {
        match side {
            Side::Attribute { text, .. } => Ok(text.clone()),
            Side::Literal(_, value) => {
                let meta = match other {
                    Side::Attribute { literal_meta, .. } => Some(literal_meta),
                    Side::Literal(..) => None,
                };
                self.literal(value, meta, timeless)
            }
        }
    }

    /// Resolves a dotted path to its protocol form and terminal field.
    fn attribute(&self, scope: &Scope<'_>, path: &str) -> Result<(String, FieldMeta)> {
        let chain = resolve_path(self.metadata.as_ref(), scope.entity_type, path)?;
        let rendered = chain
            .iter()
            .map(|meta| self.remote_name(meta))
            .collect::<Vec<_>>()
            .join("/");
        let terminal = chain.into_iter().last().ok_or_else(|| QueryError::EmptyPath {
            path: path.to_owned(),
        })?;
        Ok((scope.qualify(rendered), terminal))
    }

    fn remote_name(&self, meta: &FieldMeta) -> String {
        match &meta.remote_name {
            Some(name) => name.clone(),
            None => self.config.name_case.apply(&meta.name),
        }
    }

    fn literal(&self, value: &Value, meta: Option<&FieldMeta>, timeless: Option<bool>) -> Result<String> {
        if value.is_null() {
            return Ok("null".to_owned());
        }
        if let Some(timeless) = timeless {
            let instant = self
                .dates
                .parse(value)
                .ok_or_else(|| QueryError::InvalidDate {
                    value: value.to_string(),
                })?;
            return Ok(self.dates.format(instant, timeless));
        }
        if let Some(meta) = meta {
            match &meta.attr_type {
                Some(AttrType::Enum { type_name }) => {
                    return Ok(format!(
                        "{}{}",
                        self.config.qualify(type_name),
                        quote(&value.to_string())
                    ));
                }
                Some(AttrType::Date) => {
                    let instant =
                        self.dates
                            .parse(value)
                            .ok_or_else(|| QueryError::InvalidDate {
                                value: value.to_string(),
                            })?;
                    return Ok(self.dates.format(instant, false));
                }
                Some(AttrType::Number | AttrType::Decimal) => return numeric_literal(meta, value),
                Some(AttrType::Boolean) => return boolean_literal(meta, value),
                _ => {}
            }
            let unquoted = matches!(meta.attr_type, Some(AttrType::Guid))
                || matches!(meta.key_type, Some(KeyType::Guid | KeyType::Number));
            if unquoted {
                return Ok(value.to_string());
            }
            if meta.key_type == Some(KeyType::String) {
                return Ok(quote(&value.to_string()));
            }
        }
        match value {
            Value::String(s) => Ok(quote(s)),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => Ok(value.to_string()),
            Value::DateTime(instant) => Ok(self.dates.format(*instant, false)),
            Value::Null => Ok("null".to_owned()),
            Value::List(_) | Value::Object(_) => Err(QueryError::invalid(format!(
                "{} values cannot be rendered as protocol literals",
                value.type_name()
            ))),
        }
    }

    fn select_list(&self, tree: &SelectTree) -> Result<String> {
        let mut names = Vec::with_capacity(tree.select.len());
        for name in &tree.select {
            let meta = self.metadata.resolve(&tree.entity_type, name)?;
            names.push(self.remote_name(&meta));
        }
        Ok(names.join(","))
    }

    fn expand_list(&self, tree: &SelectTree) -> Result<String> {
        let mut entries = Vec::with_capacity(tree.expand.len());
        for (name, child) in &tree.expand {
            let meta = self.metadata.resolve(&tree.entity_type, name)?;
            let rendered = self.remote_name(&meta);
            if child.is_trivial() {
                entries.push(rendered);
                continue;
            }
            let prefix = &self.config.param_prefix;
            let mut options = vec![format!("{prefix}select={}", self.select_list(child)?)];
            let nested = self.expand_list(child)?;
            if !nested.is_empty() {
                options.push(format!("{prefix}expand={nested}"));
            }
            entries.push(format!("{rendered}({})", options.join(";")));
        }
        Ok(entries.join(","))
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn operator(op: SimpleOp) -> &'static str {
    match op {
        SimpleOp::Eq => "eq",
        SimpleOp::Neq => "ne",
        SimpleOp::Ge => "gt",
        SimpleOp::Geq => "ge",
        SimpleOp::Le => "lt",
        SimpleOp::Leq => "le",
    }
}

/// Number attributes render unquoted; strings must hold a number.
fn numeric_literal(meta: &FieldMeta, value: &Value) -> Result<String> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(value.to_string()),
        Value::String(raw) if raw.trim().parse::<f64>().is_ok_and(f64::is_finite) => {
            Ok(raw.trim().to_owned())
        }
        other => Err(literal_mismatch(meta, other)),
    }
}

fn boolean_literal(meta: &FieldMeta, value: &Value) -> Result<String> {
    match value {
        Value::Bool(v) => Ok(v.to_string()),
        Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok("true".to_owned()),
            "false" => Ok("false".to_owned()),
            _ => Err(literal_mismatch(meta, value)),
        },
        other => Err(literal_mismatch(meta, other)),
    }
}

fn literal_mismatch(meta: &FieldMeta, value: &Value) -> QueryError {
    QueryError::invalid(format!(
        "{} value '{value}' does not match the type of {}.{}",
        value.type_name(),
        meta.source_type,
        meta.name
    ))
}

fn quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}
