//! State machine task behind a [`SenderLink`](super::SenderLink).
//!
//! The task owns the link state, the pending sends, and the transport. It
//! reacts to four sources: caller commands, attach attempts settling, send
//! outcomes, and notifications from the installed link. Each reaction runs
//! to completion before the next one starts.

use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered};
use futures::{FutureExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;

use super::deferred::{Deferred, ReplayWhen};
use super::pending::{PendingId, PendingSends};
use super::{Command, Completion, LinkState, LinkStatus};
use crate::attach::attach_sender_link;
use crate::config::LinkOptions;
use crate::error::{LinkError, Result, TransportResult};
use crate::message::{DeliveryState, MessageEnqueued};
use crate::observer::ErrorObservers;
use crate::transport::{Link, LinkEvent, LinkTransport};

/// A caller request as seen by the state machine.
enum Operation {
    /// `None` when the attach was started by a send.
    Attach(Option<Completion<()>>),
    Detach,
    Send(PendingId),
}

/// A link installed by a successful attach.
struct LiveLink<L> {
    link: L,

    /// `None` once the notification stream has ended.
    events: Option<BoxStream<'static, LinkEvent>>,
}

enum State<L> {
    Detached,
    Attaching {
        attempt: u64,
        completion: Option<Completion<()>>,
    },
    /// The only state holding a link.
    Attached(LiveLink<L>),
    Detaching,
}

impl<L> State<L> {
    fn kind(&self) -> LinkState {
        match self {
            State::Detached => LinkState::Detached,
            State::Attaching { .. } => LinkState::Attaching,
            State::Attached(_) => LinkState::Attached,
            State::Detaching => LinkState::Detaching,
        }
    }

    fn listening(&self) -> bool {
        matches!(
            self,
            State::Attached(LiveLink {
                events: Some(_),
                ..
            })
        )
    }
}

/// Target of a transition together with the data its entry step needs.
enum Transition<L> {
    Detached {
        error: Option<LinkError>,
        completion: Option<Completion<()>>,
    },
    Attaching {
        completion: Option<Completion<()>>,
    },
    Attached {
        link: L,
        completion: Option<Completion<()>>,
    },
    Detaching {
        error: Option<LinkError>,
    },
}

type AttachOutcome<L> = (u64, TransportResult<L>);
type SendOutcome = (PendingId, TransportResult<DeliveryState>);

pub(super) struct LinkActor<T: LinkTransport> {
    address: String,
    options: LinkOptions,
    transport: T,
    state: State<T::Link>,
    sends: PendingSends,
    deferred: Deferred<Operation>,
    observers: ErrorObservers,
    mailbox: mpsc::UnboundedReceiver<Command>,

    /// Attempt counter; an attempt that is no longer current is stale.
    attempts: u64,

    /// Attach attempts in progress, including abandoned ones. An abandoned
    /// attempt stays here until the transport answers it.
    attaching: FuturesUnordered<BoxFuture<'static, AttachOutcome<T::Link>>>,

    /// Outcomes of messages handed to the live link.
    outcomes: FuturesUnordered<BoxFuture<'static, SendOutcome>>,

    /// Set once every handle is gone; new operations are refused.
    closing: bool,
}

impl<T: LinkTransport> LinkActor<T> {
    pub(super) fn new(
        address: String,
        options: LinkOptions,
        transport: T,
        mailbox: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            address,
            options,
            transport,
            state: State::Detached,
            sends: PendingSends::new(),
            deferred: Deferred::new(),
            observers: ErrorObservers::new(),
            mailbox,
            attempts: 0,
            attaching: FuturesUnordered::new(),
            outcomes: FuturesUnordered::new(),
            closing: false,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("Sender link task started for {}", self.address);

        loop {
            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((attempt, created)) = self.attaching.next(), if !self.attaching.is_empty() => {
                    self.on_attach_settled(attempt, created);
                }
                Some((id, outcome)) = self.outcomes.next(), if !self.outcomes.is_empty() => {
                    self.on_send_settled(id, outcome);
                }
                event = next_event(&mut self.state), if self.state.listening() => {
                    self.on_link_event(event);
                }
            }
        }

        self.shutdown();
        debug!("Sender link task stopped for {}", self.address);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Attach(completion) => self.dispatch(Operation::Attach(Some(completion))),
            Command::Detach => self.dispatch(Operation::Detach),
            Command::Send(message, completion) => {
                let id = self.sends.insert(message, completion);
                trace!("Message {} submitted on {}", id, self.address);
                self.dispatch(Operation::Send(id));
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Subscribe(sink) => self.observers.add(sink),
        }
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state.kind(),
            unsent: self.sends.unsent_len(),
            in_flight: self.sends.in_flight_len(),
        }
    }

    fn dispatch(&mut self, op: Operation) {
        if self.closing {
            self.reject(op, LinkError::Closed);
            return;
        }

        match self.state.kind() {
            LinkState::Detached => match op {
                Operation::Attach(completion) => {
                    self.transition(Transition::Attaching { completion })
                }
                Operation::Detach => {
                    trace!("Detach ignored, {} is already detached", self.address)
                }
                Operation::Send(id) => {
                    self.sends.push_unsent(id);
                    self.dispatch(Operation::Attach(None));
                }
            },
            LinkState::Attaching => match op {
                // Answered by the outcome of the attempt in progress.
                Operation::Attach(completion) => self
                    .deferred
                    .defer(Operation::Attach(completion), ReplayWhen::Settled),
                Operation::Detach => self.transition(Transition::Detaching { error: None }),
                Operation::Send(id) => self.sends.push_unsent(id),
            },
            LinkState::Attached => match op {
                Operation::Attach(completion) => complete(completion, Ok(())),
                Operation::Detach => self.transition(Transition::Detaching { error: None }),
                Operation::Send(id) => self.send_on_link(id),
            },
            LinkState::Detaching => self.deferred.defer(op, ReplayWhen::Detached),
        }
    }

    fn reject(&mut self, op: Operation, error: LinkError) {
        match op {
            Operation::Attach(completion) => complete(completion, Err(error)),
            Operation::Detach => {}
            Operation::Send(id) => complete(self.sends.remove(id), Err(error)),
        }
    }

    fn send_on_link(&mut self, id: PendingId) {
        let State::Attached(live) = &mut self.state else {
            return;
        };
        let Some(message) = self.sends.start_in_flight(id) else {
            return;
        };

        trace!("Sending message {} on {}", id, self.address);
        let outcome = live.link.send(message);
        self.outcomes
            .push(outcome.map(move |outcome| (id, outcome)).boxed());
    }

    fn transition(&mut self, next: Transition<T::Link>) {
        let previous = std::mem::replace(&mut self.state, State::Detaching);
        trace!(
            "Sender link {} leaving {} state",
            self.address,
            previous.kind()
        );
        let abandoning = matches!(
            (&previous, &next),
            (State::Attaching { .. }, Transition::Detaching { .. })
        );
        let mut retained = self.exit(previous);

        // Attaches waiting on the abandoned attempt share its fate.
        if abandoning {
            for op in self.deferred.take_waiting(ReplayWhen::Settled) {
                self.reject(op, LinkError::Detached);
            }
        }

        if !matches!(next, Transition::Detaching { .. }) {
            if let Some(mut link) = retained.take() {
                warn!("Closing sender link {} left behind by a transition", self.address);
                link.force_close();
            }
        }

        match next {
            Transition::Detached { error, completion } => self.enter_detached(error, completion),
            Transition::Attaching { completion } => self.enter_attaching(completion),
            Transition::Attached { link, completion } => self.enter_attached(link, completion),
            Transition::Detaching { error } => self.enter_detaching(retained, error),
        }

        for op in self.deferred.take_ready(self.state.kind()) {
            self.dispatch(op);
        }
    }

    /// Runs the exit step of `previous` and returns the link it held, if any.
    fn exit(&mut self, previous: State<T::Link>) -> Option<T::Link> {
        match previous {
            State::Attaching {
                attempt,
                completion,
            } => {
                // Still held only when the attempt is being abandoned.
                if completion.is_some() {
                    debug!(
                        "Abandoning attach attempt {} for {}",
                        attempt, self.address
                    );
                }
                complete(completion, Err(LinkError::Detached));
                None
            }
            // Notifications stop with the stream; the link goes to the detaching step.
            State::Attached(LiveLink { link, events }) => {
                drop(events);
                Some(link)
            }
            State::Detached | State::Detaching => None,
        }
    }

    fn enter_detached(&mut self, error: Option<LinkError>, completion: Option<Completion<()>>) {
        self.state = State::Detached;

        let flushed = self.sends.flush();
        if !flushed.is_empty() {
            let failure = error.clone().unwrap_or(LinkError::Detached);
            debug!(
                "Failing {} pending message(s) on {}: {}",
                flushed.len(),
                self.address,
                failure
            );
            for pending in flushed {
                let _ = pending.send(Err(failure.clone()));
            }
        }

        match (completion, error) {
            (Some(completion), error) => {
                let _ = completion.send(error.map_or(Ok(()), Err));
            }
            (None, Some(error)) => {
                self.observers.emit(&error);
            }
            (None, None) => {}
        }

        info!("Sender link {} detached", self.address);
    }

    fn enter_attaching(&mut self, completion: Option<Completion<()>>) {
        self.attempts += 1;
        let attempt = self.attempts;
        debug!(
            "Attaching sender link {} (attempt {})",
            self.address, attempt
        );

        let created = attach_sender_link(&self.transport, &self.address, &self.options);
        self.attaching
            .push(created.map(move |created| (attempt, created)).boxed());
        self.state = State::Attaching {
            attempt,
            completion,
        };
    }

    fn enter_attached(&mut self, mut link: T::Link, completion: Option<Completion<()>>) {
        let events = link.events();
        self.state = State::Attached(LiveLink {
            link,
            events: Some(events),
        });
        info!("Sender link {} attached", self.address);

        let unsent = self.sends.drain_unsent();
        if !unsent.is_empty() {
            debug!(
                "Flushing {} buffered message(s) on {}",
                unsent.len(),
                self.address
            );
        }
        for id in unsent {
            self.dispatch(Operation::Send(id));
        }

        complete(completion, Ok(()));
    }

    fn enter_detaching(&mut self, link: Option<T::Link>, error: Option<LinkError>) {
        self.state = State::Detaching;

        if let Some(mut link) = link {
            debug!("Force closing sender link {}", self.address);
            link.force_close();
        }
        // Outcomes still owed by the closed link are not waited for.
        self.outcomes = FuturesUnordered::new();

        self.transition(Transition::Detached {
            error,
            completion: None,
        });
    }

    fn on_attach_settled(&mut self, attempt: u64, created: TransportResult<T::Link>) {
        let current = match &mut self.state {
            State::Attaching {
                attempt: current,
                completion,
            } if *current == attempt => Some(completion.take()),
            _ => None,
        };

        let Some(completion) = current else {
            match created {
                Ok(mut link) => {
                    warn!(
                        "Closing sender link {} from abandoned attempt {}",
                        self.address, attempt
                    );
                    link.force_close();
                }
                Err(err) => trace!(
                    "Abandoned attempt {} for {} failed: {}",
                    attempt, self.address, err
                ),
            }
            return;
        };

        match created {
            Ok(link) => self.transition(Transition::Attached { link, completion }),
            Err(err) => {
                warn!("Failed to attach sender link {}: {}", self.address, err);
                self.transition(Transition::Detached {
                    error: Some(LinkError::Attach(err)),
                    completion,
                });
            }
        }
    }

    fn on_send_settled(&mut self, id: PendingId, outcome: TransportResult<DeliveryState>) {
        let Some(completion) = self.sends.finish_in_flight(id) else {
            trace!("Dropping late outcome of message {} on {}", id, self.address);
            return;
        };

        let outcome = match outcome {
            Ok(delivery) => {
                trace!("Message {} settled on {}: {:?}", id, self.address, delivery);
                Ok(MessageEnqueued::new(delivery))
            }
            Err(err) => {
                debug!("Message {} failed on {}: {}", id, self.address, err);
                Err(LinkError::Send(err))
            }
        };
        let _ = completion.send(outcome);
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Detached { error }) => {
                match &error {
                    Some(err) => warn!("Remote detached sender link {}: {}", self.address, err),
                    None => info!("Remote detached sender link {}", self.address),
                }
                self.transition(Transition::Detaching {
                    error: error.map(LinkError::Link),
                });
            }
            Some(LinkEvent::ErrorReceived(err)) => {
                warn!("Sender link {} reported an error: {}", self.address, err);
                self.transition(Transition::Detaching {
                    error: Some(LinkError::Link(err)),
                });
            }
            None => {
                debug!("Notification stream of {} ended", self.address);
                if let State::Attached(live) = &mut self.state {
                    live.events = None;
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.closing = true;
        if self.state.kind() != LinkState::Detached {
            info!("Last handle to {} dropped, closing", self.address);
            self.transition(Transition::Detaching { error: None });
        }
    }
}

async fn next_event<L>(state: &mut State<L>) -> Option<LinkEvent> {
    match state {
        State::Attached(LiveLink {
            events: Some(events),
            ..
        }) => events.next().await,
        _ => futures::future::pending().await,
    }
}

fn complete<T>(completion: Option<Completion<T>>, outcome: Result<T>) {
    if let Some(completion) = completion {
        let _ = completion.send(outcome);
    }
}
