use crate::ast::{Func, SqlType};

/// Dialect-specific pieces of SQL generation.
///
/// Everything that differs between engines (quoting, placeholders, function
/// spelling, type names) lives behind this trait; the
/// [`Renderer`](super::render::Renderer) handles the rest.
pub trait SqlGenerator: Send + Sync {
    /// Quote an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Case-insensitive pattern operator.
    fn fuzzy_operator(&self) -> &str;

    fn bool_literal(&self, val: bool) -> String {
        if val { "TRUE".to_string() } else { "FALSE".to_string() }
    }

    fn string_literal(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    /// Name of a cast target type.
    fn type_name(&self, ty: SqlType) -> &'static str;

    /// `base ^ exponent`.
    fn power(&self, base: &str, exponent: &str) -> String;

    /// Render a function call whose arguments are already rendered.
    fn function_call(&self, func: Func, args: &[String]) -> String {
        ansi_function_call(func, args)
    }

    fn limit_offset(&self, limit: &str, offset: &str) -> String {
        format!(" LIMIT {} OFFSET {}", limit, offset)
    }
}

/// Standard SQL spelling of [`Func`], shared by the dialects.
pub fn ansi_function_call(func: Func, args: &[String]) -> String {
    match func {
        Func::Lower => format!("LOWER({})", args.join(", ")),
        Func::Trim => format!("TRIM({})", args.join(", ")),
        Func::Length => format!("CHAR_LENGTH({})", args.join(", ")),
        Func::Replace => format!("REPLACE({})", args.join(", ")),
        Func::Reverse => format!("REVERSE({})", args.join(", ")),
        Func::NullIf => format!("NULLIF({})", args.join(", ")),
        Func::Truncate => format!("TRUNC({})", args.join(", ")),
        Func::Position => match args {
            [needle, haystack] => format!("POSITION({} IN {})", needle, haystack),
            _ => format!("POSITION({})", args.join(", ")),
        },
        Func::RegexReplace => format!("REGEXP_REPLACE({})", args.join(", ")),
        Func::RegexMatch => format!("REGEXP_LIKE({})", args.join(", ")),
        Func::Count => format!("COUNT({})", args.join(", ")),
    }
}

/// Escape an identifier with double quotes (ANSI style).
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
