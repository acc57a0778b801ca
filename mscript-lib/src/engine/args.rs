use crate::engine::context::BuildContext;
use crate::error::ExpansionError;

/// Expands macro placeholders in a raw argument into a literal string.
pub trait TokenExpander {
    fn expand(&self, raw: &str, context: &BuildContext) -> Result<String, ExpansionError>;
}

/// Expands `$NAME` and `${NAME}` from the build context.
///
/// Unknown variables are left as written, `$$` produces a literal `$`.
/// An unterminated `${` or an empty `${}` fails the expansion.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvExpander;

impl TokenExpander for EnvExpander {
    fn expand(&self, raw: &str, context: &BuildContext) -> Result<String, ExpansionError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(idx) = rest.find('$') {
            out.push_str(&rest[..idx]);
            let after = &rest[idx + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                out.push('$');
                rest = tail;
            } else if let Some(braced) = after.strip_prefix('{') {
                let end = braced
                    .find('}')
                    .ok_or_else(|| ExpansionError::new(raw, "unterminated '${'"))?;
                let name = &braced[..end];
                if name.is_empty() {
                    return Err(ExpansionError::new(raw, "empty variable name in '${}'"));
                }
                match context.var(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &braced[end + 1..];
            } else {
                let len = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                if len == 0 || after.starts_with(|c: char| c.is_ascii_digit()) {
                    out.push('$');
                    rest = after;
                    continue;
                }
                let name = &after[..len];
                match context.var(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                }
                rest = &after[len..];
            }
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Expands each raw argument in order, optionally splitting it shell-style.
///
/// The first failing argument aborts the whole pipeline.
pub fn expand_args<E>(
    expander: &E,
    raw_args: &[String],
    tokenize: bool,
    context: &BuildContext,
) -> Result<Vec<String>, ExpansionError>
where
    E: TokenExpander + ?Sized,
{
    let mut expanded = Vec::with_capacity(raw_args.len());

    for raw in raw_args {
        let value = expander.expand(raw, context)?;
        if tokenize {
            let tokens = shell_words::split(&value)
                .map_err(|e| ExpansionError::new(raw.as_str(), e.to_string()))?;
            expanded.extend(tokens);
        } else {
            expanded.push(value);
        }
    }

    Ok(expanded)
}
