// The historical error taxonomy. Every interpreter-level failure is one of
// the classic two-letter codes; the host file boundary adds FILE NOT FOUND.

use std::{error, fmt, io, result};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Syntax,
    NextWithoutFor,
    ReturnWithoutGosub,
    OutOfData,
    IllegalQuantity,
    Overflow,
    OutOfMemory,
    UndefdStatement,
    BadSubscript,
    RedimdArray,
    DivisionByZero,
    IllegalDirect,
    TypeMismatch,
    OutOfStringSpace,
    StringTooLong,
    FormulaTooComplex,
    CantContinue,
    UndefdFunction,
    FileNotFound,
    Io(io::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax => "SN",
            Self::NextWithoutFor => "NF",
            Self::ReturnWithoutGosub => "RG",
            Self::OutOfData => "OD",
            Self::IllegalQuantity => "FC",
            Self::Overflow => "OV",
            Self::OutOfMemory => "OM",
            Self::UndefdStatement => "UL",
            Self::BadSubscript => "BS",
            Self::RedimdArray => "DD",
            Self::DivisionByZero => "/0",
            Self::IllegalDirect => "ID",
            Self::TypeMismatch => "TM",
            Self::OutOfStringSpace => "OS",
            Self::StringTooLong => "LS",
            Self::FormulaTooComplex => "ST",
            Self::CantContinue => "CN",
            Self::UndefdFunction => "UF",
            Self::FileNotFound | Self::Io(_) => "FN",
        }
    }
    pub fn message(&self) -> &'static str {
        match self {
            Self::Syntax => "SYNTAX",
            Self::NextWithoutFor => "NEXT WITHOUT FOR",
            Self::ReturnWithoutGosub => "RETURN WITHOUT GOSUB",
            Self::OutOfData => "OUT OF DATA",
            Self::IllegalQuantity => "ILLEGAL QUANTITY",
            Self::Overflow => "OVERFLOW",
            Self::OutOfMemory => "OUT OF MEMORY",
            Self::UndefdStatement => "UNDEF'D STATEMENT",
            Self::BadSubscript => "BAD SUBSCRIPT",
            Self::RedimdArray => "REDIM'D ARRAY",
            Self::DivisionByZero => "DIVISION BY ZERO",
            Self::IllegalDirect => "ILLEGAL DIRECT",
            Self::TypeMismatch => "TYPE MISMATCH",
            Self::OutOfStringSpace => "OUT OF STRING SPACE",
            Self::StringTooLong => "STRING TOO LONG",
            Self::FormulaTooComplex => "FORMULA TOO COMPLEX",
            Self::CantContinue => "CAN'T CONTINUE",
            Self::UndefdFunction => "UNDEF'D FUNCTION",
            Self::FileNotFound | Self::Io(_) => "FILE NOT FOUND",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{} ERROR", self.message())
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound,
            _ => Self::Io(err),
        }
    }
}
