//! One process worth of state: the data module and data set, the resource
//! pools, the tool dispatcher, the element store and the cluster replicator.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cluster::{ClusterReplicator, ReplayContext, ReplayOutcome, ReplicationError, Role, StreamPipe};
use crate::config::SessionOptions;
use crate::dataset::{DataSet, VariableManager};
use crate::dispatch::{AlgorithmPartition, DispatchContext, LocatorKind, Tool, ToolDispatcher, ToolId};
use crate::element::{
    next_numbered_path, Element, ElementFileError, ElementFileFormat, ElementFileReader, ElementSource,
    ElementStore, StoreSummary,
};
use crate::geom::Transform;
use crate::locator::{DrawList, Locator, LocatorContext};
use crate::module::{DataModule, ModuleRegistry};
use crate::pool::{ClippingPlanePool, CuttingPlanePool};
use crate::startup::{ClusterEndpoint, StartupArgs, StartupError};

pub struct Session {
    options: SessionOptions,
    module: Box<dyn DataModule>,
    data_set: Arc<DataSet>,
    variables: VariableManager,
    cutting_planes: CuttingPlanePool,
    clipping_planes: ClippingPlanePool,
    partition: AlgorithmPartition,
    selected_algorithm: usize,
    dispatcher: ToolDispatcher,
    elements: ElementStore,
    /// Elements finished by locator callbacks since the last frame.
    pending: Vec<Element>,
    replicator: ClusterReplicator,
}

impl Session {
    /// Starts a session from parsed command-line arguments: options, cluster
    /// pipe, module and data set, palette, then the `-load` files.
    ///
    /// Failures of the palette or of an element file are logged and skipped.
    pub fn from_args(args: &StartupArgs) -> Result<Self, StartupError> {
        let (class, data_set_args) = args.module()?;
        let options = match &args.config {
            Some(path) => SessionOptions::load(path)?,
            None => SessionOptions::default(),
        };
        let replicator = match &args.cluster {
            None => ClusterReplicator::standalone(),
            Some(ClusterEndpoint::Listen { addr, slaves }) => ClusterReplicator::new(
                Role::Master,
                Some(Box::new(StreamPipe::listen(addr.as_str(), *slaves)?)),
            )?,
            Some(ClusterEndpoint::Connect { addr }) => ClusterReplicator::new(
                Role::Slave,
                Some(Box::new(StreamPipe::connect(addr.as_str())?)),
            )?,
        };

        let mut session = Self::start(
            &ModuleRegistry::default(),
            class,
            data_set_args,
            options,
            replicator,
        )?;

        if let Some(path) = args.palette.clone().or_else(|| session.options.default_palette.clone()) {
            session.load_palette(&path);
        }
        for path in &args.load {
            if let Err(err) = session.load_elements(path) {
                log::warn!("cannot load elements from {}: {err}", path.display());
            }
        }
        Ok(session)
    }

    /// Creates the module and obtains the data set: the master loads it and
    /// sends it to the slaves, slaves receive it.
    pub fn start(
        registry: &ModuleRegistry,
        class: &str,
        data_set_args: &[String],
        options: SessionOptions,
        mut replicator: ClusterReplicator,
    ) -> Result<Self, StartupError> {
        let module = registry.create(class)?;
        let data_set = if replicator.is_master() {
            let started = Instant::now();
            let data_set = module.load(data_set_args)?;
            log::info!(
                "loaded {} data set in {:.1} ms",
                module.class_name(),
                started.elapsed().as_secs_f64() * 1000.0
            );
            replicator.broadcast_data_set(&data_set)?;
            data_set
        } else {
            replicator.receive_data_set()?
        };
        Ok(Self::with_data_set(module, data_set, options, replicator))
    }

    /// Session around a data set that is already in memory.
    #[must_use]
    pub fn with_data_set(
        module: Box<dyn DataModule>,
        data_set: DataSet,
        options: SessionOptions,
        replicator: ClusterReplicator,
    ) -> Self {
        let variables = VariableManager::new(&data_set);
        let partition = AlgorithmPartition::from_menu(
            &variables,
            module.scalar_algorithm_names(),
            module.vector_algorithm_names(),
        );
        log::debug!("algorithm menu: {:?}", partition.labels());
        Self {
            cutting_planes: CuttingPlanePool::with_capacity(options.cutting_plane_capacity),
            clipping_planes: ClippingPlanePool::with_capacity(options.clipping_plane_capacity),
            options,
            module,
            data_set: Arc::new(data_set),
            variables,
            partition,
            selected_algorithm: 0,
            dispatcher: ToolDispatcher::new(),
            elements: ElementStore::new(),
            pending: Vec::new(),
            replicator,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn module(&self) -> &dyn DataModule {
        &*self.module
    }

    #[must_use]
    pub fn data_set(&self) -> &DataSet {
        &self.data_set
    }

    #[must_use]
    pub const fn variables(&self) -> &VariableManager {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableManager {
        &mut self.variables
    }

    #[must_use]
    pub const fn partition(&self) -> &AlgorithmPartition {
        &self.partition
    }

    #[must_use]
    pub const fn selected_algorithm(&self) -> usize {
        self.selected_algorithm
    }

    #[must_use]
    pub const fn elements(&self) -> &ElementStore {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut ElementStore {
        &mut self.elements
    }

    #[must_use]
    pub const fn cutting_planes(&self) -> &CuttingPlanePool {
        &self.cutting_planes
    }

    pub fn clipping_planes_mut(&mut self) -> &mut ClippingPlanePool {
        &mut self.clipping_planes
    }

    #[must_use]
    pub const fn clipping_planes(&self) -> &ClippingPlanePool {
        &self.clipping_planes
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub const fn replicator(&self) -> &ClusterReplicator {
        &self.replicator
    }

    #[must_use]
    pub fn summary(&self) -> StoreSummary {
        self.elements.summary()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Menu, palette, planes
    // ─────────────────────────────────────────────────────────────────────

    /// Selects the menu entry new tools are bound to.
    pub fn select_algorithm(&mut self, index: usize) -> bool {
        if !self.partition.contains(index) {
            log::warn!("no algorithm menu entry {index}");
            return false;
        }
        self.selected_algorithm = index;
        true
    }

    /// Loads a palette for the current scalar variable. Failures keep the
    /// previous palette.
    pub fn load_palette(&mut self, path: &Path) -> bool {
        match self.variables.load_palette(path) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("ignoring palette {}: {err}", path.display());
                false
            }
        }
    }

    /// Plane equations of the active cutting planes in slot order, at most
    /// `max_active_clip_planes` of them.
    pub fn active_cutting_planes(&self) -> impl Iterator<Item = [f64; 4]> + '_ {
        self.cutting_planes
            .active()
            .take(self.options.max_active_clip_planes)
            .map(|slot| slot.plane.equation())
    }

    pub fn active_clipping_planes(&self) -> impl Iterator<Item = [f64; 4]> + '_ {
        self.clipping_planes.active().map(|slot| slot.plane.equation())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tools
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_tool_created(&mut self, tool: Tool) -> Option<LocatorKind> {
        let mut ctx = DispatchContext {
            cutting_planes: &mut self.cutting_planes,
            module: &*self.module,
            variables: &self.variables,
            data_set: &self.data_set,
            role: self.replicator.role(),
        };
        self.dispatcher
            .on_tool_created(tool, self.selected_algorithm, &self.partition, &mut ctx)
    }

    pub fn on_tool_destroyed(&mut self, tool: Tool) -> bool {
        let mut ctx = LocatorContext {
            cutting_planes: &mut self.cutting_planes,
            data_set: &self.data_set,
            variables: &mut self.variables,
            finished: &mut self.pending,
        };
        self.dispatcher.on_tool_destroyed(tool, &mut ctx)
    }

    pub fn on_motion(&mut self, tool: ToolId, device: &Transform) -> bool {
        self.with_locator(tool, |locator, ctx| locator.on_motion(device, ctx))
    }

    pub fn on_press(&mut self, tool: ToolId) -> bool {
        self.with_locator(tool, Locator::on_press)
    }

    pub fn on_release(&mut self, tool: ToolId) -> bool {
        self.with_locator(tool, Locator::on_release)
    }

    fn with_locator(
        &mut self,
        tool: ToolId,
        callback: impl FnOnce(&mut Locator, &mut LocatorContext<'_>),
    ) -> bool {
        let Some(locator) = self.dispatcher.locator_mut(tool) else {
            return false;
        };
        let mut ctx = LocatorContext {
            cutting_planes: &mut self.cutting_planes,
            data_set: &self.data_set,
            variables: &mut self.variables,
            finished: &mut self.pending,
        };
        callback(locator, &mut ctx);
        true
    }

    /// Per-frame work: collects finished extractions and mirrors them to
    /// every participant. Slaves take the master's elements instead of
    /// their own.
    pub fn frame(&mut self) -> Result<ReplayOutcome, ReplicationError> {
        let mut ctx = LocatorContext {
            cutting_planes: &mut self.cutting_planes,
            data_set: &self.data_set,
            variables: &mut self.variables,
            finished: &mut self.pending,
        };
        for locator in self.dispatcher.locators_mut() {
            locator.update(&mut ctx);
        }
        let finished = std::mem::take(&mut self.pending);
        let mut ctx = ReplayContext {
            module: &*self.module,
            variables: &self.variables,
            data_set: &self.data_set,
            store: &mut self.elements,
        };
        self.replicator.publish_finished(finished, &mut ctx)
    }

    /// Draw requests of all locators for this frame.
    pub fn render(&self, list: &mut DrawList) {
        for locator in self.dispatcher.locators() {
            locator.highlight(list);
            locator.render_opaque(&self.cutting_planes, list);
            locator.render_transparent(list);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Element files
    // ─────────────────────────────────────────────────────────────────────

    /// Replays an element file on every participant. Only the master opens
    /// the file; if it cannot, the round still runs, empty, so slaves stay
    /// in step.
    pub fn load_elements(&mut self, path: &Path) -> Result<ReplayOutcome, ReplicationError> {
        let (mut reader, open_error) = if self.replicator.is_master() {
            match ElementFileReader::open(path) {
                Ok(reader) => (Some(reader), None),
                Err(err) => (
                    Some(ElementFileReader::new(io::empty(), ElementFileFormat::Ascii)),
                    Some(err),
                ),
            }
        } else {
            (None, None)
        };

        let mut ctx = ReplayContext {
            module: &*self.module,
            variables: &self.variables,
            data_set: &self.data_set,
            store: &mut self.elements,
        };
        let source = reader.as_mut().map(|reader| reader as &mut dyn ElementSource);
        let outcome = self.replicator.replay(source, &mut ctx)?;
        match open_error {
            Some(err) => Err(err.into()),
            None => Ok(outcome),
        }
    }

    /// Writes all visible elements to the next free numbered file. Slaves
    /// never write and get `None`.
    pub fn save_elements(&self) -> Result<Option<PathBuf>, ElementFileError> {
        if !self.replicator.is_master() {
            return Ok(None);
        }
        let dir = self
            .options
            .save_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let path = next_numbered_path(
            &dir,
            &self.options.element_file_stem,
            self.options.numbered_file_digits,
            self.options.save_format(),
        );
        self.elements
            .save(&path, self.options.save_format(), &self.variables)?;
        Ok(Some(path))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut ctx = LocatorContext {
            cutting_planes: &mut self.cutting_planes,
            data_set: &self.data_set,
            variables: &mut self.variables,
            finished: &mut self.pending,
        };
        self.dispatcher.clear(&mut ctx);
    }
}
