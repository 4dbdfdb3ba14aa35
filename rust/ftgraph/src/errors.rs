#[derive(Debug)]
pub enum FtGraphError {
    MissingAnnotation {
        type_name: &'static str,
        context: &'static str,
    },
    AnnotationAlreadyRegistered {
        type_name: &'static str,
    },
    FormulaParseError {
        msg: String,
    },
    UnknownElement {
        symbol: String,
    },
}

impl std::fmt::Display for FtGraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for FtGraphError {}

pub type Result<T> = std::result::Result<T, FtGraphError>;
