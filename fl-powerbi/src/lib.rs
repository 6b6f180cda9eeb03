//! Power BI data access for flightlens: Azure AD tokens, DAX execution with
//! status classification and retry, live schema discovery, the DAX reference
//! retriever, filter-context predicates and the fast metrics menu.

pub mod clock;
pub mod credentials;
pub mod docs;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod filters;
pub mod metrics;
pub mod report;
pub mod schema;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use credentials::{AadTokenProvider, AzureAdCredentials, TokenSource};
pub use docs::{DocRetriever, KeywordRetriever};
pub use envelope::{QueryResponse, Row, format_rows};
pub use error::{ErrorKind, PowerBiError, Result};
pub use executor::{DatasetRef, QueryExecutor, RetryPolicy};
pub use filters::{ColumnFilter, FilterContext, FilterKind, FilterValue, Predicate};
pub use metrics::{Dimension, DimensionRow, FilteredStats, Measure, MetricsCalculator, QuickMetric};
pub use report::{EmbedInfo, ReportClient};
pub use schema::{SchemaDiscovery, SchemaMap};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
