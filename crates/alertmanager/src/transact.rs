use crate::events::Envelope;
use crate::notify::Notifier;
use crate::{App, Error, Rejection, Result, State};
use eventlog::EventLog;

pub const MAX_OPTIMISTIC_LOCKING_RETRIES: u32 = 5;

/// Decision is the outcome of deciding a mutation against current State:
/// events to append, and the output to return once they're committed.
#[derive(Debug)]
pub struct Decision<T> {
    pub events: Vec<Envelope>,
    pub output: T,
}

impl<T> Decision<T> {
    pub fn new(events: Vec<Envelope>, output: T) -> Self {
        Self { events, output }
    }

    /// A Decision which appends nothing.
    pub fn unchanged(output: T) -> Self {
        Self {
            events: Vec::new(),
            output,
        }
    }
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Run a transaction which decides upon events to append using `decide`.
    ///
    /// `decide` is evaluated against State as of the current head of the log,
    /// and its events are appended only if the log hasn't since advanced.
    /// If another writer appended first, `decide` is evaluated again against
    /// the updated State, up to MAX_OPTIMISTIC_LOCKING_RETRIES times.
    ///
    /// A Rejection returned by `decide` aborts the transaction without appending.
    #[tracing::instrument(skip_all, fields(transaction = name))]
    pub async fn run_transaction<T, F>(&self, name: &'static str, mut decide: F) -> Result<T>
    where
        F: FnMut(&State) -> std::result::Result<Decision<T>, Rejection> + Send,
        T: Send,
    {
        let mut retry_count = 0;

        loop {
            self.sync().await?;

            let (cursor, decision) = self.store.read(|state, cursor| (cursor, decide(state)));
            let Decision { events, output } = decision?;

            if events.is_empty() {
                return Ok(output);
            }
            let entries: Vec<String> = events.iter().map(Envelope::encode).collect();

            let err = match self.log.append_after(cursor, entries).await {
                Ok(head) => {
                    tracing::debug!(%cursor, %head, events = events.len(), "committed transaction");

                    // The commit stands even if we fail to fold it now.
                    // It'll be folded by the next sync.
                    if let Err(err) = self.sync().await {
                        tracing::warn!(error = ?err, "failed to sync after commit");
                    }
                    return Ok(output);
                }
                Err(err) if err.is_conflict() => err,
                Err(err) => return Err(Error::Log(err)),
            };

            if retry_count >= MAX_OPTIMISTIC_LOCKING_RETRIES {
                tracing::error!(
                    retry_count,
                    error = %err,
                    "giving up after maximum number of retries"
                );
                return Err(Error::ConcurrencyExhausted {
                    attempts: retry_count + 1,
                    source: err,
                });
            }
            retry_count += 1;

            tracing::info!(
                retry_count,
                error = %err,
                "will retry due to optimistic locking failure"
            );
        }
    }
}
