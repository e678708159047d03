use std::io;
use std::sync::Arc;

use serde::Serialize;

use super::pipe::{MulticastPipe, PipeError};
use super::protocol::{self, ProtocolState, EXTRACTION_FAILED, GEOMETRY_FOLLOWS};
use super::Role;
use crate::algorithm::{Algorithm, NoProgress, Parameters};
use crate::codec::{self, CodecError};
use crate::dataset::{DataSet, DataSetError, VariableManager};
use crate::element::{Element, ElementFileError, ElementSource, ElementStore};
use crate::module::DataModule;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error("cluster pipe I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed cluster stream: {0}")]
    Stream(#[from] CodecError),
    #[error("element source failed: {0}")]
    Source(#[from] ElementFileError),
    #[error("malformed data set on the cluster stream: {0}")]
    DataSet(#[from] DataSetError),
    #[error("a {role:?} cannot {operation}")]
    WrongRole {
        role: Role,
        operation: &'static str,
    },
}

/// What one participant did during a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    /// Names of the elements added to the store, in order.
    pub registered: Vec<String>,
    /// Names no algorithm of the module answers to.
    pub skipped: Vec<String>,
    /// Names whose extraction failed on the master.
    pub failed: Vec<String>,
    /// End markers seen or sent; 1 after a complete round.
    pub sentinels: usize,
}

/// Session state a round reads and fills.
pub struct ReplayContext<'a> {
    pub module: &'a dyn DataModule,
    pub variables: &'a VariableManager,
    pub data_set: &'a DataSet,
    pub store: &'a mut ElementStore,
}

/// Where the master takes the next element from.
enum Feed<'s> {
    Source(&'s mut dyn ElementSource),
    Finished(std::vec::IntoIter<Element>),
    /// Slaves read everything from the pipe.
    Pipe,
}

enum Round {
    AwaitingName,
    AwaitingParameters {
        name: String,
        algorithm: Arc<dyn Algorithm>,
        finished: Option<Element>,
    },
    Executing {
        name: String,
        algorithm: Arc<dyn Algorithm>,
        parameters: Box<dyn Parameters>,
        finished: Option<Element>,
    },
    Publishing(Element),
    Finished,
}

impl Round {
    const fn state(&self) -> ProtocolState {
        match self {
            Self::AwaitingName => ProtocolState::AwaitingName,
            Self::AwaitingParameters { .. } => ProtocolState::AwaitingParameters,
            Self::Executing { .. } => ProtocolState::Executing,
            Self::Publishing(_) => ProtocolState::Publishing,
            Self::Finished => ProtocolState::Finished,
        }
    }
}

/// Keeps the element stores of all cluster participants identical.
///
/// The master reads element files and runs extractions; slaves rebuild the
/// same elements from the pipe. Without a pipe the replicator is a master
/// with no slaves and every send is skipped.
pub struct ClusterReplicator {
    role: Role,
    pipe: Option<Box<dyn MulticastPipe>>,
    state: ProtocolState,
}

impl ClusterReplicator {
    /// Replicator of a process that is not part of a cluster.
    #[must_use]
    pub fn standalone() -> Self {
        Self {
            role: Role::Master,
            pipe: None,
            state: ProtocolState::Finished,
        }
    }

    /// Fails when `role` does not match the end of the pipe, or when a
    /// slave has no pipe to read from.
    pub fn new(role: Role, pipe: Option<Box<dyn MulticastPipe>>) -> Result<Self, ReplicationError> {
        let pipe_role = pipe.as_ref().map_or(Role::Master, |pipe| pipe.role());
        if pipe_role != role {
            return Err(ReplicationError::WrongRole {
                role,
                operation: "use this end of the cluster pipe",
            });
        }
        Ok(Self {
            role,
            pipe,
            state: ProtocolState::Finished,
        })
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.pipe.is_some()
    }

    /// State reached by the last round.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    // ─────────────────────────────────────────────────────────────────────
    // Data set
    // ─────────────────────────────────────────────────────────────────────

    /// Sends the master's data set to every slave.
    pub fn broadcast_data_set(&mut self, data_set: &DataSet) -> Result<(), ReplicationError> {
        self.require(Role::Master, "broadcast a data set")?;
        if let Some(pipe) = self.pipe.as_deref_mut() {
            pipe.barrier()?;
            data_set.write_binary(pipe)?;
            pipe.finish_message()?;
            pipe.barrier()?;
            log::debug!("data set sent to {} slaves", pipe.num_slaves());
        }
        Ok(())
    }

    /// Receives the data set the master broadcasts.
    pub fn receive_data_set(&mut self) -> Result<DataSet, ReplicationError> {
        self.require(Role::Slave, "receive a data set")?;
        let pipe = self.slave_pipe()?;
        pipe.barrier()?;
        let data_set = DataSet::read_binary(pipe)?;
        pipe.barrier()?;
        Ok(data_set)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Rounds
    // ─────────────────────────────────────────────────────────────────────

    /// Replays a saved element file on every participant.
    ///
    /// The master passes the file, slaves pass `None`. The round is framed by
    /// barriers. When the file turns out to be malformed the master still
    /// ends the round for the slaves, keeps the elements read so far and
    /// returns the error.
    pub fn replay(
        &mut self,
        source: Option<&mut dyn ElementSource>,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<ReplayOutcome, ReplicationError> {
        let feed = match (self.role, source) {
            (Role::Master, Some(source)) => Feed::Source(source),
            (Role::Master, None) => {
                return Err(ReplicationError::WrongRole {
                    role: Role::Master,
                    operation: "replay without an element source",
                });
            }
            (Role::Slave, _) => Feed::Pipe,
        };
        self.barrier()?;
        let mut outcome = ReplayOutcome::default();
        let result = self.run(feed, ctx, &mut outcome);
        if let Err(err) = &result {
            if self.is_master() && matches!(err, ReplicationError::Source(_)) {
                log::warn!("element file aborted after {} elements: {err}", outcome.registered.len());
                self.send_end(&mut outcome)?;
            }
        }
        self.barrier()?;
        result.map(|()| {
            log::info!(
                "replayed {} elements, skipped {}",
                outcome.registered.len(),
                outcome.skipped.len()
            );
            outcome
        })
    }

    /// Mirrors the elements the master's locators finished this frame.
    ///
    /// On slaves `finished` is ignored and the master's elements are read
    /// from the pipe instead.
    pub fn publish_finished(
        &mut self,
        finished: Vec<Element>,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<ReplayOutcome, ReplicationError> {
        let feed = match self.role {
            Role::Master => Feed::Finished(finished.into_iter()),
            Role::Slave => {
                if !finished.is_empty() {
                    log::debug!("slave dropped {} locally finished elements", finished.len());
                }
                Feed::Pipe
            }
        };
        let mut outcome = ReplayOutcome::default();
        self.run(feed, ctx, &mut outcome)?;
        Ok(outcome)
    }

    fn run(
        &mut self,
        mut feed: Feed<'_>,
        ctx: &mut ReplayContext<'_>,
        outcome: &mut ReplayOutcome,
    ) -> Result<(), ReplicationError> {
        let mut round = Round::AwaitingName;
        let mut previous = ProtocolState::Finished;
        loop {
            self.state = round.state();
            debug_assert!(
                previous.can_advance_to(self.state),
                "replication cannot go from {previous:?} to {:?}",
                self.state
            );
            previous = self.state;
            crate::debug_log!("replication ({:?}): {:?}", self.role, self.state);
            round = match round {
                Round::AwaitingName => match self.next_name(&mut feed)? {
                    None => {
                        self.send_end(outcome)?;
                        Round::Finished
                    }
                    Some((name, finished)) => match ctx.module.find_algorithm(&name, ctx.variables) {
                        Some((_, algorithm)) => Round::AwaitingParameters {
                            name,
                            algorithm,
                            finished,
                        },
                        None => {
                            log::warn!(
                                "skipping element `{name}`: {} has no such algorithm",
                                ctx.module.class_name()
                            );
                            self.send_with(|out| protocol::write_name(out, &name))?;
                            outcome.skipped.push(name);
                            Round::AwaitingName
                        }
                    },
                },
                Round::AwaitingParameters {
                    name,
                    algorithm,
                    finished,
                } => {
                    let parameters = self.exchange_parameters(
                        &mut feed,
                        &name,
                        &*algorithm,
                        finished.as_ref(),
                        ctx.variables,
                    )?;
                    Round::Executing {
                        name,
                        algorithm,
                        parameters,
                        finished,
                    }
                }
                Round::Executing {
                    name,
                    algorithm,
                    parameters,
                    finished,
                } => match self.execute(&*algorithm, parameters, finished, ctx.data_set)? {
                    Some(element) => Round::Publishing(element),
                    None => {
                        outcome.failed.push(name);
                        Round::AwaitingName
                    }
                },
                Round::Publishing(element) => {
                    outcome.registered.push(element.name().to_string());
                    ctx.store.add(element);
                    Round::AwaitingName
                }
                Round::Finished => return Ok(()),
            };
        }
    }

    /// Master: next name from the feed. Slave: next name frame.
    fn next_name(&mut self, feed: &mut Feed<'_>) -> Result<Option<(String, Option<Element>)>, ReplicationError> {
        match feed {
            Feed::Source(source) => {
                // An empty name would read as the end marker on the slaves.
                while let Some(name) = source.next_name()? {
                    if !name.is_empty() {
                        return Ok(Some((name, None)));
                    }
                }
                Ok(None)
            }
            Feed::Finished(elements) => Ok(elements.next().map(|e| (e.name().to_string(), Some(e)))),
            Feed::Pipe => {
                let pipe = self.slave_pipe()?;
                let name = protocol::read_name(pipe)?;
                log::debug!("pipe: name frame {name:?}");
                Ok(name.map(|name| (name, None)))
            }
        }
    }

    /// Reads the parameters on both sides. The master sends the name frame
    /// only once the parameters are in hand, so a broken file never leaves
    /// slaves waiting for parameters.
    fn exchange_parameters(
        &mut self,
        feed: &mut Feed<'_>,
        name: &str,
        algorithm: &dyn Algorithm,
        finished: Option<&Element>,
        variables: &VariableManager,
    ) -> Result<Box<dyn Parameters>, ReplicationError> {
        let parameters = match (feed, finished) {
            (Feed::Pipe, _) => {
                let mut parameters = algorithm.default_parameters();
                let mut input = self.slave_pipe()?;
                parameters.read_binary(&mut input)?;
                return Ok(parameters);
            }
            (_, Some(element)) => element.parameters().clone_box(),
            (Feed::Source(source), None) => {
                let mut parameters = algorithm.default_parameters();
                source.read_parameters(&mut *parameters, variables)?;
                parameters
            }
            (Feed::Finished(_), None) => algorithm.default_parameters(),
        };
        self.send_with(|out| {
            protocol::write_name(out, name)?;
            parameters.write_binary(out)
        })?;
        Ok(parameters)
    }

    /// Master: runs the extraction, or takes the finished element, and
    /// sends its geometry. Slave: rebuilds the element from the stream.
    fn execute(
        &mut self,
        algorithm: &dyn Algorithm,
        parameters: Box<dyn Parameters>,
        finished: Option<Element>,
        data_set: &DataSet,
    ) -> Result<Option<Element>, ReplicationError> {
        if self.role == Role::Slave {
            let mut pipe = self.slave_pipe()?;
            if codec::read_u8(pipe)? != GEOMETRY_FOLLOWS {
                return Ok(None);
            }
            let mut element = algorithm.start_slave_element(parameters);
            algorithm.continue_slave_element(&mut element, &mut pipe)?;
            return Ok(Some(element));
        }

        let element = match finished {
            Some(element) => Some(element),
            None => {
                let started = std::time::Instant::now();
                match algorithm.create_element(data_set, parameters, &mut NoProgress) {
                    Ok(element) => {
                        log::info!(
                            "created {} in {:.1} ms",
                            algorithm.name(),
                            started.elapsed().as_secs_f64() * 1000.0
                        );
                        Some(element)
                    }
                    Err(err) => {
                        log::warn!("{}: {err}", algorithm.name());
                        None
                    }
                }
            }
        };
        self.send_with(|out| match &element {
            Some(element) => {
                codec::write_u8(out, GEOMETRY_FOLLOWS)?;
                element.geometry().write_binary(out)
            }
            None => codec::write_u8(out, EXTRACTION_FAILED),
        })?;
        if let Some(pipe) = self.pipe.as_mut() {
            pipe.finish_message()?;
        }
        Ok(element)
    }

    fn send_end(&mut self, outcome: &mut ReplayOutcome) -> Result<(), ReplicationError> {
        outcome.sentinels += 1;
        if self.role == Role::Slave {
            return Ok(());
        }
        self.send_with(|out| protocol::write_end(out))?;
        if let Some(pipe) = self.pipe.as_mut() {
            pipe.finish_message()?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pipe access
    // ─────────────────────────────────────────────────────────────────────

    /// Writes to the pipe on a clustered master; does nothing otherwise.
    fn send_with(
        &mut self,
        write: impl FnOnce(&mut dyn io::Write) -> io::Result<()>,
    ) -> Result<(), ReplicationError> {
        if self.role == Role::Master {
            if let Some(mut out) = self.pipe.as_deref_mut() {
                write(&mut out)?;
            }
        }
        Ok(())
    }

    fn slave_pipe(&mut self) -> Result<&mut (dyn MulticastPipe + 'static), ReplicationError> {
        let role = self.role;
        self.pipe
            .as_deref_mut()
            .filter(|_| role == Role::Slave)
            .ok_or(ReplicationError::WrongRole {
                role,
                operation: "read from the cluster pipe",
            })
    }

    fn barrier(&mut self) -> Result<(), ReplicationError> {
        if let Some(pipe) = self.pipe.as_mut() {
            pipe.barrier()?;
        }
        Ok(())
    }

    fn require(&self, role: Role, operation: &'static str) -> Result<(), ReplicationError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ReplicationError::WrongRole {
                role: self.role,
                operation,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::cluster::channel_group;
    use crate::dataset::tests::linear_data_set;
    use crate::element::{ElementFileFormat, ElementFileReader, Geometry};
    use crate::geom::Transform;
    use crate::module::AnalyticField;

    struct Participant {
        data_set: DataSet,
        variables: VariableManager,
        store: ElementStore,
    }

    impl Participant {
        fn new() -> Self {
            let data_set = linear_data_set(Transform::identity());
            let variables = VariableManager::new(&data_set);
            Self {
                data_set,
                variables,
                store: ElementStore::new(),
            }
        }

        fn ctx<'a>(&'a mut self, module: &'a dyn DataModule) -> ReplayContext<'a> {
            ReplayContext {
                module,
                variables: &self.variables,
                data_set: &self.data_set,
                store: &mut self.store,
            }
        }
    }

    const SLICE_FILE: &str = "Orthogonal Slice\nscalarVariable Linear\nsliceAxis 2\nslicePosition 1\nseedPoint 1 1 1\n";

    #[test]
    fn standalone_replay_registers_elements() {
        let mut replicator = ClusterReplicator::standalone();
        let mut local = Participant::new();
        let text = format!("Volume Renderer\n{SLICE_FILE}");
        let mut reader = ElementFileReader::new(text.as_bytes(), ElementFileFormat::Ascii);
        let outcome = replicator
            .replay(Some(&mut reader), &mut local.ctx(&AnalyticField))
            .expect("replay");
        assert_eq!(outcome.registered, ["Orthogonal Slice"]);
        assert_eq!(outcome.skipped, ["Volume Renderer"]);
        assert_eq!(outcome.sentinels, 1);
        assert_eq!(replicator.state(), ProtocolState::Finished);
        assert!(!local.store.get(0).expect("element").geometry().is_empty());
    }

    #[test]
    fn consecutive_rounds_follow_the_protocol_transitions() {
        // Transitions are checked by a debug assertion inside every round.
        let mut replicator = ClusterReplicator::standalone();
        let mut local = Participant::new();
        for text in [format!("Volume Renderer\n{SLICE_FILE}Volume Renderer\n"), String::new()] {
            let mut reader = ElementFileReader::new(text.as_bytes(), ElementFileFormat::Ascii);
            let outcome = replicator
                .replay(Some(&mut reader), &mut local.ctx(&AnalyticField))
                .expect("replay");
            assert_eq!(outcome.sentinels, 1);
            assert_eq!(replicator.state(), ProtocolState::Finished);
        }
        replicator
            .publish_finished(Vec::new(), &mut local.ctx(&AnalyticField))
            .expect("frame");
        assert_eq!(replicator.state(), ProtocolState::Finished);
        assert_eq!(local.store.len(), 1);
    }

    #[test]
    fn slave_rebuilds_the_master_elements() {
        let (master_pipe, mut slave_pipes) = channel_group(1);
        let slave_pipe = slave_pipes.remove(0);
        let slave = thread::spawn(move || {
            let mut replicator =
                ClusterReplicator::new(Role::Slave, Some(Box::new(slave_pipe))).expect("slave");
            let mut local = Participant::new();
            let outcome = replicator.replay(None, &mut local.ctx(&AnalyticField)).expect("replay");
            (outcome, local.store)
        });

        let mut replicator =
            ClusterReplicator::new(Role::Master, Some(Box::new(master_pipe))).expect("master");
        let mut local = Participant::new();
        let mut reader = ElementFileReader::new(SLICE_FILE.as_bytes(), ElementFileFormat::Ascii);
        let outcome = replicator
            .replay(Some(&mut reader), &mut local.ctx(&AnalyticField))
            .expect("replay");

        let (slave_outcome, slave_store) = slave.join().expect("join");
        assert_eq!(outcome, slave_outcome);
        let master_element = local.store.get(0).expect("master element");
        let slave_element = slave_store.get(0).expect("slave element");
        assert_eq!(master_element.geometry(), slave_element.geometry());
        assert_eq!(
            format!("{:?}", master_element.parameters()),
            format!("{:?}", slave_element.parameters())
        );
    }

    #[test]
    fn malformed_file_still_ends_the_round_for_slaves() {
        let (master_pipe, mut slave_pipes) = channel_group(1);
        let slave_pipe = slave_pipes.remove(0);
        let slave = thread::spawn(move || {
            let mut replicator =
                ClusterReplicator::new(Role::Slave, Some(Box::new(slave_pipe))).expect("slave");
            let mut local = Participant::new();
            replicator.replay(None, &mut local.ctx(&AnalyticField)).expect("replay")
        });

        let mut replicator =
            ClusterReplicator::new(Role::Master, Some(Box::new(master_pipe))).expect("master");
        let mut local = Participant::new();
        let text = format!("{SLICE_FILE}Orthogonal Slice\nscalarVariable \"Linear\nsliceAxis 2\n");
        let mut reader = ElementFileReader::new(text.as_bytes(), ElementFileFormat::Ascii);
        match replicator.replay(Some(&mut reader), &mut local.ctx(&AnalyticField)) {
            Err(ReplicationError::Source(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(local.store.len(), 1);

        let slave_outcome = slave.join().expect("join");
        assert_eq!(slave_outcome.registered, ["Orthogonal Slice"]);
        assert_eq!(slave_outcome.sentinels, 1);
    }

    #[test]
    fn finished_elements_are_mirrored_each_frame() {
        let (master_pipe, mut slave_pipes) = channel_group(1);
        let slave_pipe = slave_pipes.remove(0);
        let slave = thread::spawn(move || {
            let mut replicator =
                ClusterReplicator::new(Role::Slave, Some(Box::new(slave_pipe))).expect("slave");
            let mut local = Participant::new();
            let first = replicator
                .publish_finished(Vec::new(), &mut local.ctx(&AnalyticField))
                .expect("frame");
            let second = replicator
                .publish_finished(Vec::new(), &mut local.ctx(&AnalyticField))
                .expect("frame");
            (first, second, local.store)
        });

        let mut replicator =
            ClusterReplicator::new(Role::Master, Some(Box::new(master_pipe))).expect("master");
        let mut local = Participant::new();
        let module = AnalyticField;
        let (_, rake) = module.find_algorithm("Arrow Rake", &local.variables).expect("rake");
        let parameters = rake
            .seed_parameters(&local.data_set, crate::geom::Point3::new(1.0, 1.0, 1.0))
            .expect("inside");
        let element = rake
            .create_element(&local.data_set, parameters, &mut NoProgress)
            .expect("element");
        let expected = element.geometry().clone();

        replicator.publish_finished(vec![element], &mut local.ctx(&module)).expect("frame");
        replicator.publish_finished(Vec::new(), &mut local.ctx(&module)).expect("frame");

        let (first, second, store) = slave.join().expect("join");
        assert_eq!(first.registered, ["Arrow Rake"]);
        assert!(second.registered.is_empty());
        assert_eq!(second.sentinels, 1);
        assert_eq!(store.get(0).expect("element").geometry(), &expected);
        assert!(!matches!(expected, Geometry::Empty));
    }

    #[test]
    fn data_set_reaches_the_slaves() {
        let (master_pipe, mut slave_pipes) = channel_group(1);
        let slave_pipe = slave_pipes.remove(0);
        let slave = thread::spawn(move || {
            let mut replicator =
                ClusterReplicator::new(Role::Slave, Some(Box::new(slave_pipe))).expect("slave");
            replicator.receive_data_set().expect("data set")
        });
        let mut replicator =
            ClusterReplicator::new(Role::Master, Some(Box::new(master_pipe))).expect("master");
        let data_set = linear_data_set(Transform::identity());
        replicator.broadcast_data_set(&data_set).expect("broadcast");
        let received = slave.join().expect("join");
        assert_eq!(received.grid().dims(), data_set.grid().dims());
        assert_eq!(received.scalar_variables()[0].values(), data_set.scalar_variables()[0].values());
    }

    #[test]
    fn roles_must_match_the_pipe() {
        let (_, mut slave_pipes) = channel_group(1);
        match ClusterReplicator::new(Role::Master, Some(Box::new(slave_pipes.remove(0)))) {
            Err(ReplicationError::WrongRole { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("accepted a slave pipe as master"),
        }
        match ClusterReplicator::new(Role::Slave, None) {
            Err(ReplicationError::WrongRole { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("accepted a slave without a pipe"),
        }
        match ClusterReplicator::standalone().receive_data_set() {
            Err(ReplicationError::WrongRole { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
