use std::sync::Arc;
use crate::base::behavior::*;
use crate::timeq::Cycle;

/// Bookkeeping every module carries: its local cycle count, its mutable state (usually the
/// statistics it accumulates), and its shared configuration.
#[derive(Debug)]
pub struct ModuleBase<T, C> {
    pub cycle: Cycle,
    pub state: T,
    pub config: Arc<C>,
}

impl<T: Default, C> ModuleBase<T, C> {
    pub fn new(config: Arc<C>) -> Self {
        Self {
            cycle: 0,
            state: T::default(),
            config,
        }
    }

    /// Clear cycle count and state, keeping the configuration.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.state = T::default();
    }
}

pub trait IsModule: ModuleBehaviors {
    type StateType;
    type ConfigType;

    fn base(&mut self) -> &mut ModuleBase<Self::StateType, Self::ConfigType>;

    fn base_ref(&self) -> &ModuleBase<Self::StateType, Self::ConfigType>;

    fn state(&self) -> &Self::StateType {
        &self.base_ref().state
    }
}

/// arguments: identifier, state type, config type, additional methods
macro_rules! module {
    ($comp:ident, $T:ty, $C:ty, $($method:item)*) => {
        impl IsModule for $comp {
            type StateType = $T;
            type ConfigType = $C;

            fn base(&mut self) -> &mut ModuleBase<$T, $C> {
                &mut self.base
            }

            fn base_ref(&self) -> &ModuleBase<$T, $C> {
                &self.base
            }

            $($method)*
        }
    };
}

pub(crate) use module;
