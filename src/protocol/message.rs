//! Message types for the PostgreSQL wire protocol
use bytes::Bytes;
use std::collections::HashMap;

/// Protocol version for a v3.0 startup packet
pub const PROTOCOL_VERSION_3: i32 = 196608;

/// Magic protocol "version" carried by a CancelRequest packet
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Magic protocol "version" carried by an SSLRequest packet
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic protocol "version" carried by a GSSENCRequest packet
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// First frame on a connection. It has no type tag; the protocol field
/// doubles as a discriminator for the SSL/GSS/cancel sentinels.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupFrame {
    /// Normal v3.0 startup with parameters (user, database, ...)
    Startup {
        /// Parameters (key-value pairs)
        parameters: HashMap<String, String>,
    },

    /// TLS negotiation request
    SslRequest,

    /// GSSAPI encryption request
    GssEncRequest,

    /// Out-of-band cancellation of another session
    CancelRequest {
        /// Backend process ID to cancel
        process_id: i32,
        /// Secret key proving ownership
        secret_key: i32,
    },
}

/// Frontend (client-to-server) message types
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// Authentication response ('p'). Covers PasswordMessage,
    /// SASLInitialResponse and SASLResponse; the payload shape depends on
    /// where the authenticator is in its exchange, so it is kept raw here.
    AuthResponse(Bytes),

    /// Query message (simple query protocol)
    Query(String),

    /// Parse message (extended query protocol)
    Parse {
        /// Prepared statement name (empty = unnamed)
        name: String,
        /// Query string
        query: String,
        /// Declared parameter type OIDs (0 = unspecified)
        param_types: Vec<i32>,
    },

    /// Bind message (extended query protocol)
    Bind {
        /// Portal name (empty = unnamed)
        portal: String,
        /// Prepared statement name
        statement: String,
        /// Parameter format codes
        param_formats: Vec<i16>,
        /// Raw parameter values (None = NULL)
        param_values: Vec<Option<Bytes>>,
        /// Result format codes
        result_formats: Vec<i16>,
    },

    /// Describe message (extended query protocol)
    Describe {
        /// Object type (b'S' for statement, b'P' for portal)
        object_type: u8,
        /// Object name
        name: String,
    },

    /// Execute message (extended query protocol)
    Execute {
        /// Portal name
        portal: String,
        /// Maximum row count (0 for unlimited)
        max_rows: i32,
    },

    /// Sync message (extended query protocol)
    Sync,

    /// Flush message (extended query protocol)
    Flush,

    /// Close message (extended query protocol)
    Close {
        /// Object type (b'S' for statement, b'P' for portal)
        object_type: u8,
        /// Object name
        name: String,
    },

    /// Terminate message
    Terminate,

    /// COPY data message
    CopyData(Bytes),

    /// COPY done message
    CopyDone,

    /// COPY fail message
    CopyFail(String),

    /// Unknown message type
    Unknown {
        /// Message tag
        tag: u8,
        /// Message body
        body: Bytes,
    },
}

impl FrontendMessage {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::AuthResponse(_) => "AuthResponse",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind { .. } => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::CopyData(_) => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail(_) => "CopyFail",
            FrontendMessage::Unknown { .. } => "Unknown",
        }
    }
}

/// Backend (server-to-client) message types
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationRequest),

    /// Backend key data for out-of-band cancellation
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery(TransactionStatus),

    /// Command complete
    CommandComplete(String),

    /// Row description
    RowDescription(Vec<FieldDescription>),

    /// Data row
    DataRow(Vec<Option<Bytes>>),

    /// Empty query response
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Parse complete
    ParseComplete,

    /// Bind complete
    BindComplete,

    /// Portal suspended (row limit reached, portal keeps its cursor)
    PortalSuspended,

    /// No data
    NoData,

    /// Parameter description
    ParameterDescription(Vec<i32>),

    /// Close complete
    CloseComplete,

    /// Copy in response
    CopyInResponse {
        /// Overall format (0 text, 1 binary)
        format: i8,
        /// Per-column formats
        column_formats: Vec<i16>,
    },

    /// Copy out response
    CopyOutResponse {
        /// Overall format (0 text, 1 binary)
        format: i8,
        /// Per-column formats
        column_formats: Vec<i16>,
    },

    /// Copy data
    CopyData(Bytes),

    /// Copy done
    CopyDone,

    /// SSL negotiation answer (single byte, no frame header)
    SslResponse(bool),
}

/// Authentication request types emitted by the server
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationRequest {
    /// Authentication successful
    Ok,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for the double-MD5 scheme
        salt: [u8; 4],
    },

    /// SASL authentication required
    Sasl {
        /// Advertised mechanisms, preferred first
        mechanisms: Vec<String>,
    },

    /// SASL continuation (server-first-message)
    SaslContinue {
        /// Mechanism-specific payload
        data: Bytes,
    },

    /// SASL final (server-final-message)
    SaslFinal {
        /// Mechanism-specific payload
        data: Bytes,
    },
}

/// Transaction status carried in ReadyForQuery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction)
    Idle,

    /// In a transaction block
    InTransaction,

    /// In a failed transaction block
    Failed,
}

impl TransactionStatus {
    /// Convert from a status byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Convert to the wire status byte
    pub fn to_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Field description for a RowDescription message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    /// Field name
    pub name: String,

    /// Table OID (0 if synthetic)
    pub table_oid: i32,

    /// Column attribute number (0 if synthetic)
    pub column_id: i16,

    /// Data type OID
    pub data_type_oid: i32,

    /// Data type size (negative = variable)
    pub data_type_size: i16,

    /// Type modifier
    pub type_modifier: i32,

    /// Format code (0 text, 1 binary)
    pub format_code: i16,
}

impl FieldDescription {
    /// A synthetic column not backed by a table.
    pub fn synthetic(name: impl Into<String>, type_oid: i32, format_code: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            data_type_oid: type_oid,
            data_type_size: crate::types::type_size(type_oid),
            type_modifier: -1,
            format_code,
        }
    }
}

/// Error and notice message fields. Fields are written in a fixed order so
/// responses are byte-stable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorFields {
    /// Severity ("ERROR", "FATAL", "NOTICE", ...)
    pub severity: String,

    /// SQLSTATE code
    pub code: String,

    /// Primary message
    pub message: String,

    /// Detail message
    pub detail: Option<String>,

    /// Hint message
    pub hint: Option<String>,

    /// Error position (1-based character index into the query)
    pub position: Option<i32>,
}

impl ErrorFields {
    /// An ERROR-severity response.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR".to_string(),
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
        }
    }

    /// A FATAL-severity response (connection will close).
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "FATAL".to_string(),
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
        }
    }

    /// A NOTICE-severity response.
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            severity: "NOTICE".to_string(),
            code: "00000".to_string(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
        }
    }

    /// Attach a detail line.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
