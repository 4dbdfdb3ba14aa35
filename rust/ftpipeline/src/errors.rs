use ftgraph::FtGraphError;

#[derive(Debug)]
pub enum FtPipelineError {
    Graph(FtGraphError),
    Timeout {
        stage: &'static str,
        elapsed_ms: u64,
    },
    EmptyInput {
        context: &'static str,
    },
    NoDecomposition {
        mz: f64,
    },
    InvalidInput {
        msg: String,
    },
    ParseError {
        msg: String,
    },
}

impl std::fmt::Display for FtPipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for FtPipelineError {}

impl From<FtGraphError> for FtPipelineError {
    fn from(x: FtGraphError) -> Self {
        Self::Graph(x)
    }
}

pub type Result<T> = std::result::Result<T, FtPipelineError>;
