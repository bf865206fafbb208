use async_trait::async_trait;
use futures_util::future::poll_fn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::debug;

use crate::error::{Result, SqlDbError};
use crate::format::{PostgresDialect, QueryFormatter};

use super::{Notification, NotificationConnector, NotificationTransport};

/// Opens dedicated, unpooled Postgres sessions for LISTEN.
#[derive(Clone)]
pub struct PgNotificationConnector {
    config: tokio_postgres::Config,
}

impl PgNotificationConnector {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NotificationConnector for PgNotificationConnector {
    async fn connect(&self) -> Result<Box<dyn NotificationTransport>> {
        let (client, mut connection) = self.config.connect(NoTls).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            loop {
                match poll_fn(|cx| connection.poll_message(cx)).await {
                    Some(Ok(AsyncMessage::Notification(n))) => {
                        let notification = Notification {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                            process_id: n.process_id(),
                        };
                        if tx.send(Ok(notification)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(AsyncMessage::Notice(notice))) => {
                        debug!(notice = %notice.message(), "postgres notice on listener connection");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = tx.send(Err(SqlDbError::from(e)));
                        break;
                    }
                    None => break,
                }
            }
        });
        Ok(Box::new(PgNotificationTransport {
            client,
            incoming: rx,
            driver,
        }))
    }
}

/// `LISTEN`/`UNLISTEN` on the quoted channel, so the name matches the
/// `channel` reported by notifications byte for byte.
fn channel_statement(verb: &str, channel: &str) -> Result<String> {
    Ok(format!("{verb} {}", PostgresDialect.quote_identifier(channel)?))
}

struct PgNotificationTransport {
    client: Client,
    incoming: mpsc::UnboundedReceiver<Result<Notification>>,
    driver: JoinHandle<()>,
}

impl Drop for PgNotificationTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl NotificationTransport for PgNotificationTransport {
    async fn listen(&mut self, channel: &str) -> Result<()> {
        let sql = channel_statement("LISTEN", channel)?;
        self.client.batch_execute(&sql).await.map_err(|e| SqlDbError::from(e).with_query(sql))
    }

    async fn unlisten(&mut self, channel: &str) -> Result<()> {
        let sql = channel_statement("UNLISTEN", channel)?;
        self.client.batch_execute(&sql).await.map_err(|e| SqlDbError::from(e).with_query(sql))
    }

    async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Notification>> {
        match self.incoming.recv().await {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn channel_names_keep_their_case() {
        assert_eq!(channel_statement("LISTEN", "Jobs").unwrap(), "LISTEN \"Jobs\"");
        assert_eq!(channel_statement("UNLISTEN", "jobs").unwrap(), "UNLISTEN \"jobs\"");
        let err = channel_statement("LISTEN", "jobs; DROP TABLE t").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
