/// Per-cycle behavior shared by every timed component.
pub trait ModuleBehaviors {
    /// Advance the component by exactly one cycle.
    fn tick_one(&mut self) -> anyhow::Result<()>;

    /// Return to the power-on state, keeping configuration and connections.
    fn reset(&mut self);
}
