use cadence_types::PortHandle;

/// Case-insensitive substring match used for every device alias lookup.
pub fn name_matches(port_name: &str, substring: &str) -> bool {
    port_name.to_lowercase().contains(&substring.to_lowercase())
}

/// The engine's view of the open MIDI ports.
pub trait PortDirectory {
    /// First open output whose name contains `substring`.
    fn find_output(&self, substring: &str) -> Option<PortHandle>;

    /// Names of the open input ports.
    fn input_names(&self) -> Vec<String>;

    /// First open input whose name contains `substring`.
    fn find_input(&self, substring: &str) -> Option<String> {
        self.input_names()
            .into_iter()
            .find(|name| name_matches(name, substring))
    }
}

/// Fixed port lists. Handles are indices into `outputs`.
#[derive(Debug, Clone, Default)]
pub struct StaticPortDirectory {
    outputs: Vec<String>,
    inputs: Vec<String>,
}

impl StaticPortDirectory {
    pub fn new(outputs: Vec<String>, inputs: Vec<String>) -> Self {
        Self { outputs, inputs }
    }

    pub fn output_name(&self, handle: PortHandle) -> Option<&str> {
        self.outputs.get(handle.0).map(String::as_str)
    }
}

impl PortDirectory for StaticPortDirectory {
    fn find_output(&self, substring: &str) -> Option<PortHandle> {
        self.outputs
            .iter()
            .position(|name| name_matches(name, substring))
            .map(PortHandle)
    }

    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }
}
