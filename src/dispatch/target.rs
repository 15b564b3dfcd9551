use std::fmt;

use crate::value::FunctionHandle;

/// What a call is addressed to.
#[derive(Debug, Clone)]
pub enum Target<'a> {
    /// `tag:name`; acquires the loader for `tag` on first use.
    Qualified { tag: &'a str, name: &'a str },
    /// Bare name, searched across live loaders in creation order.
    Global(&'a str),
    Handle(&'a FunctionHandle),
}

impl<'a> Target<'a> {
    /// Splits on the first `:`. Everything after it is the function name, so
    /// names may themselves contain colons.
    pub fn parse(target: &'a str) -> Self {
        match target.split_once(':') {
            Some((tag, name)) => Target::Qualified {
                tag: tag.trim(),
                name: name.trim(),
            },
            None => Target::Global(target.trim()),
        }
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Qualified { tag, name } => write!(f, "{tag}:{name}"),
            Target::Global(name) => f.write_str(name),
            Target::Handle(function) => f.write_str(&function.qualified_name()),
        }
    }
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(target: &'a str) -> Self {
        Target::parse(target)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(target: &'a String) -> Self {
        Target::parse(target)
    }
}

impl<'a> From<&'a FunctionHandle> for Target<'a> {
    fn from(function: &'a FunctionHandle) -> Self {
        Target::Handle(function)
    }
}
