//! Scoped hypervisor session
//!
//! One read-only connection per run. It is closed exactly once: explicitly
//! through [`DomainSession::close`], or on drop for every other exit path.

use tracing::warn;
use zretain_core::driver::{VirtualizationConnector, VirtualizationQuery};
use zretain_core::errors::Result;

pub struct DomainSession {
    query: Option<Box<dyn VirtualizationQuery>>,
}

impl DomainSession {
    /// Open a read-only connection
    ///
    /// # Errors
    ///
    /// Propagates the connector's failure to reach the hypervisor.
    pub fn open(connector: &dyn VirtualizationConnector) -> Result<Self> {
        Ok(Self {
            query: Some(connector.open_read_only()?),
        })
    }

    pub fn query(&self) -> Option<&dyn VirtualizationQuery> {
        self.query.as_deref()
    }

    /// Close the connection and report a failure to do so
    ///
    /// # Errors
    ///
    /// Propagates the query's close failure.
    pub fn close(mut self) -> Result<()> {
        match self.query.take() {
            Some(query) => query.close(),
            None => Ok(()),
        }
    }
}

impl Drop for DomainSession {
    fn drop(&mut self) {
        if let Some(query) = self.query.take() {
            if let Err(e) = query.close() {
                warn!(error = %e, "Failed to close hypervisor connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zretain_core::memory::StaticDomains;

    #[test]
    fn test_drop_closes_once() {
        let domains = StaticDomains::new(&["win10"], &[]);
        {
            let session = DomainSession::open(&domains).unwrap();
            assert!(session.query().is_some());
        }
        assert_eq!(domains.opens(), 1);
        assert_eq!(domains.closes(), 1);
    }

    #[test]
    fn test_explicit_close_is_not_repeated_on_drop() {
        let domains = StaticDomains::new(&["win10"], &[]);
        let session = DomainSession::open(&domains).unwrap();
        session.close().unwrap();
        assert_eq!(domains.closes(), 1);
    }
}
