//! Audio processing graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use smallvec::SmallVec;
use tonegen_core::{Frames, Sample, SampleRate, Waveform};
use tonegen_node::{AudioBuffer, Node, NodeError};

/// A node in the audio graph with its cached channel counts
struct GraphNode {
    node: Box<dyn Node>,
    inputs: usize,
    outputs: usize,
}

/// Which channels a connection carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Output channel `n` feeds input channel `n` for every shared index
    All,
    /// A single output channel feeds a single input channel
    Channel { output: usize, input: usize },
}

/// Connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: usize,
    pub to: usize,
    pub route: Route,
}

/// The audio processing graph
///
/// Sources (nodes without inputs) generate, processors consume the sum of
/// everything connected to them, and only nodes explicitly connected to the
/// destination reach the graph output.
pub struct AudioGraph {
    nodes: HashMap<usize, GraphNode>,
    connections: HashSet<Connection>,
    /// Nodes connected to the destination
    sinks: HashSet<usize>,
    next_id: usize,

    // Processing state
    sample_rate: SampleRate,
    block_size: Frames,

    // Audio buffers for inter-node routing
    // Map from node_id to its output buffer
    node_buffers: HashMap<usize, Vec<Vec<Sample>>>,

    // Input buffers for mixing connected node outputs
    // Map from node_id to its input buffer (cleared and mixed before each process)
    input_buffers: HashMap<usize, Vec<Vec<Sample>>>,

    // Pre-computed processing order and incoming edges.
    // Updated when the topology changes to avoid allocating in process()
    processing_order: Vec<usize>,
    incoming: HashMap<usize, Vec<Connection>>,

    /// First node that failed since the last `take_failure`
    failure: Option<usize>,
}

impl AudioGraph {
    /// Create a new empty audio graph
    pub fn new() -> Self {
        Self::with_config(
            tonegen_core::sample_rates::SR_48000,
            tonegen_core::block_sizes::BLOCK_256,
        )
    }

    /// Create a new audio graph with specific sample rate and block size
    pub fn with_config(sample_rate: SampleRate, block_size: Frames) -> Self {
        Self {
            nodes: HashMap::new(),
            connections: HashSet::new(),
            sinks: HashSet::new(),
            next_id: 0,
            sample_rate,
            block_size,
            node_buffers: HashMap::new(),
            input_buffers: HashMap::new(),
            processing_order: Vec::new(),
            incoming: HashMap::new(),
            failure: None,
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Largest number of frames a single `process()` call handles
    pub fn block_size(&self) -> Frames {
        self.block_size
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Whether a node feeds the destination
    pub fn is_sink(&self, id: usize) -> bool {
        self.sinks.contains(&id)
    }

    fn node_mut(&mut self, id: usize) -> Result<&mut (dyn Node + '_), NodeError> {
        self.nodes
            .get_mut(&id)
            .map(|n| n.node.as_mut() as &mut dyn Node)
            .ok_or(NodeError::NotFound(id))
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, mut node: Box<dyn Node>) -> Result<usize, NodeError> {
        let id = self.next_id;
        self.next_id += 1;

        node.initialize(self.sample_rate, self.block_size)?;

        let inputs = node.input_channels();
        let outputs = node.output_channels();

        self.nodes.insert(
            id,
            GraphNode {
                node,
                inputs,
                outputs,
            },
        );

        self.allocate_node_buffer(id, inputs, outputs);
        self.update_processing_order();

        tracing::debug!("Added node {} ({} inputs, {} outputs)", id, inputs, outputs);
        Ok(id)
    }

    /// Connect every output channel of `from` to the same-numbered input of `to`
    ///
    /// Channel counts need not match: extra channels on either side are
    /// left unconnected.
    pub fn connect(&mut self, from: usize, to: usize) -> Result<(), NodeError> {
        self.insert_connection(Connection {
            from,
            to,
            route: Route::All,
        })
    }

    /// Connect one output channel of `from` to one input channel of `to`
    pub fn connect_channel(
        &mut self,
        from: usize,
        output: usize,
        to: usize,
        input: usize,
    ) -> Result<(), NodeError> {
        let source = self.nodes.get(&from).ok_or(NodeError::NotFound(from))?;
        if output >= source.outputs {
            return Err(NodeError::InvalidParameter(format!(
                "Node {from} has no output channel {output}"
            )));
        }
        let dest = self.nodes.get(&to).ok_or(NodeError::NotFound(to))?;
        if input >= dest.inputs {
            return Err(NodeError::InvalidParameter(format!(
                "Node {to} has no input channel {input}"
            )));
        }

        self.insert_connection(Connection {
            from,
            to,
            route: Route::Channel { output, input },
        })
    }

    fn insert_connection(&mut self, conn: Connection) -> Result<(), NodeError> {
        if !self.nodes.contains_key(&conn.from) {
            return Err(NodeError::NotFound(conn.from));
        }
        if !self.nodes.contains_key(&conn.to) {
            return Err(NodeError::NotFound(conn.to));
        }

        if self.connections.insert(conn) {
            tracing::debug!("Connected {} -> {} ({:?})", conn.from, conn.to, conn.route);
            self.update_processing_order();
        }

        Ok(())
    }

    /// Route a node's output to the graph output
    pub fn connect_to_destination(&mut self, id: usize) -> Result<(), NodeError> {
        if !self.nodes.contains_key(&id) {
            return Err(NodeError::NotFound(id));
        }
        if self.sinks.insert(id) {
            tracing::debug!("Connected {} -> destination", id);
        }
        Ok(())
    }

    /// Remove every connection into or out of a node, including the
    /// destination. Idempotent: returns `false` if there was nothing to remove.
    pub fn disconnect_node(&mut self, id: usize) -> bool {
        let before = self.connections.len();
        self.connections
            .retain(|conn| conn.from != id && conn.to != id);
        let removed_edges = self.connections.len() != before;
        let removed_sink = self.sinks.remove(&id);

        if removed_edges {
            self.update_processing_order();
        }
        removed_edges || removed_sink
    }

    /// Start a source node
    pub fn start_node(&mut self, id: usize) -> Result<(), NodeError> {
        self.node_mut(id)?.start()
    }

    /// Stop a source node
    pub fn stop_node(&mut self, id: usize) -> Result<(), NodeError> {
        self.node_mut(id)?.stop()
    }

    pub fn set_parameter(&mut self, id: usize, param: u32, value: f64) -> Result<(), NodeError> {
        self.node_mut(id)?.set_parameter(param, value)
    }

    pub fn ramp_parameter(
        &mut self,
        id: usize,
        param: u32,
        target: f64,
        frames: u32,
    ) -> Result<(), NodeError> {
        self.node_mut(id)?.ramp_parameter(param, target, frames)
    }

    pub fn cancel_scheduled(&mut self, id: usize, param: u32) -> Result<(), NodeError> {
        self.node_mut(id)?.cancel_scheduled(param)
    }

    pub fn get_parameter(&self, id: usize, param: u32) -> Result<f64, NodeError> {
        self.nodes
            .get(&id)
            .ok_or(NodeError::NotFound(id))?
            .node
            .get_parameter(param)
    }

    pub fn set_waveform(&mut self, id: usize, waveform: Waveform) -> Result<(), NodeError> {
        self.node_mut(id)?.set_waveform(waveform)
    }

    /// Allocate input and output buffers for a node
    fn allocate_node_buffer(
        &mut self,
        node_id: usize,
        input_channels: usize,
        output_channels: usize,
    ) {
        let input_buffer = vec![vec![0.0; self.block_size]; input_channels];
        let output_buffer = vec![vec![0.0; self.block_size]; output_channels];
        self.input_buffers.insert(node_id, input_buffer);
        self.node_buffers.insert(node_id, output_buffer);
    }

    /// Update the processing order after graph structure changes
    /// IMPORTANT: This allocates, so call it when the topology changes, NOT in `process()`
    ///
    /// Uses topological sort (Kahn's algorithm) so a node is processed only
    /// after every node that feeds into it. If the graph contains cycles,
    /// falls back to sorted node IDs.
    fn update_processing_order(&mut self) {
        self.processing_order.clear();

        match self.topological_sort() {
            Ok(order) => {
                self.processing_order = order;
                tracing::debug!(
                    "Updated processing order (topological): {:?}",
                    self.processing_order
                );
            }
            Err(cycle_nodes) => {
                tracing::warn!(
                    "Graph contains cycle involving nodes: {:?}. Using linear order instead.",
                    cycle_nodes
                );
                self.processing_order.extend(self.nodes.keys().copied());
                self.processing_order.sort_unstable();
            }
        }

        self.incoming.clear();
        for conn in &self.connections {
            self.incoming.entry(conn.to).or_default().push(*conn);
        }
    }

    /// Perform topological sort using Kahn's algorithm
    ///
    /// Returns Ok(order) if graph is acyclic, `Err(remaining_nodes)` if cycles exist.
    fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degree: HashMap<usize, usize> = HashMap::with_capacity(self.nodes.len());
        for &id in self.nodes.keys() {
            in_degree.insert(id, 0);
        }

        // Several routes between the same pair count as one dependency
        let edges: HashSet<(usize, usize)> = self
            .connections
            .iter()
            .map(|conn| (conn.from, conn.to))
            .collect();

        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::with_capacity(self.nodes.len());
        for &(from, to) in &edges {
            *in_degree.entry(to).or_insert(0) += 1;
            adjacency.entry(from).or_default().push(to);
        }

        // Min-heap keeps the order deterministic
        let mut queue: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut result = Vec::new();

        while let Some(Reverse(node_id)) = queue.pop() {
            result.push(node_id);

            if let Some(outgoing) = adjacency.get(&node_id) {
                for &to_id in outgoing {
                    if let Some(degree) = in_degree.get_mut(&to_id) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(Reverse(to_id));
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            let processed: HashSet<usize> = result.into_iter().collect();
            let remaining: Vec<usize> = self
                .nodes
                .keys()
                .filter(|id| !processed.contains(id))
                .copied()
                .collect();
            Err(remaining)
        }
    }

    /// First node that failed to process since the last call, if any
    pub fn take_failure(&mut self) -> Option<usize> {
        self.failure.take()
    }

    /// Process one block and mix every sink into `output`
    ///
    /// Handles at most `block_size` frames; returns how many were processed.
    /// A node that fails to process contributes silence for this block.
    pub fn process(&mut self, output: &mut [&mut [Sample]], frames: Frames) -> Frames {
        let frames = output
            .iter()
            .map(|ch| ch.len())
            .fold(frames.min(self.block_size), Frames::min);

        for channel in output.iter_mut() {
            channel[..frames].fill(0.0);
        }

        if self.nodes.is_empty() {
            return frames;
        }

        for &node_id in &self.processing_order {
            // Route inputs for this node
            if let Some(input_buffer) = self.input_buffers.get_mut(&node_id) {
                for channel in input_buffer.iter_mut() {
                    channel[..frames].fill(0.0);
                }

                if let Some(sources) = self.incoming.get(&node_id) {
                    for conn in sources {
                        let Some(source_output) = self.node_buffers.get(&conn.from) else {
                            continue;
                        };
                        match conn.route {
                            Route::All => {
                                for (input_ch, source_ch) in
                                    input_buffer.iter_mut().zip(source_output.iter())
                                {
                                    mix_into(&mut input_ch[..frames], &source_ch[..frames]);
                                }
                            }
                            Route::Channel { output, input } => {
                                if let (Some(input_ch), Some(source_ch)) =
                                    (input_buffer.get_mut(input), source_output.get(output))
                                {
                                    mix_into(&mut input_ch[..frames], &source_ch[..frames]);
                                }
                            }
                        }
                    }
                }
            }

            if let (Some(node), Some(input_buffer), Some(output_buffer)) = (
                self.nodes.get_mut(&node_id),
                self.input_buffers.get(&node_id),
                self.node_buffers.get_mut(&node_id),
            ) {
                let failed = {
                    // REAL-TIME SAFE: stereo and mono nodes stay on the stack
                    let input_refs: SmallVec<[&[Sample]; 2]> =
                        input_buffer.iter().map(|ch| &ch[..frames]).collect();
                    let mut output_refs: SmallVec<[&mut [Sample]; 2]> =
                        output_buffer.iter_mut().map(|ch| &mut ch[..frames]).collect();

                    let mut audio_buffer = AudioBuffer {
                        inputs: &input_refs,
                        outputs: &mut output_refs,
                        frames,
                    };
                    node.node.process(&mut audio_buffer).is_err()
                };

                // Silence on error; the caller may pick it up via `take_failure`
                if failed {
                    self.failure.get_or_insert(node_id);
                    for channel in output_buffer.iter_mut() {
                        channel[..frames].fill(0.0);
                    }
                }
            }
        }

        for &node_id in &self.processing_order {
            if !self.sinks.contains(&node_id) {
                continue;
            }
            if let Some(node_output) = self.node_buffers.get(&node_id) {
                for (out_ch, node_ch) in output.iter_mut().zip(node_output.iter()) {
                    mix_into(&mut out_ch[..frames], &node_ch[..frames]);
                }
            }
        }

        frames
    }
}

fn mix_into(dest: &mut [Sample], source: &[Sample]) {
    for (d, &s) in dest.iter_mut().zip(source) {
        *d += s;
    }
}

impl Default for AudioGraph {
    fn default() -> Self {
        Self::new()
    }
}
