//! The scripting seam.
//!
//! Level scripts are trusted authored content run by an external host. The
//! scene calls into the host through [`ScriptHost`] and hands it a
//! [`ScriptContext`] through which scripts read the level and raise events.

use glam::Vec2;

use crate::error::ScriptRuntimeError;
use crate::event::{EventQueue, GameEvent, SceneEvent};
use crate::fixed::Centis;
use crate::id::PlayerIndex;
use crate::level::Level;

/// A primitive argument passed to a script function.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl From<PlayerIndex> for ScriptValue {
    fn from(p: PlayerIndex) -> Self {
        ScriptValue::Number(p.0 as f64)
    }
}

/// What a script can see and do while it runs.
pub struct ScriptContext<'a> {
    /// Scene time of the call.
    pub time: Centis,
    pub level: &'a Level,
    pub gravity: Vec2,
    /// Frame centre of every player, by index.
    pub players: &'a [Vec2],
    events: &'a mut EventQueue,
}

impl<'a> ScriptContext<'a> {
    pub fn new(
        time: Centis,
        level: &'a Level,
        gravity: Vec2,
        players: &'a [Vec2],
        events: &'a mut EventQueue,
    ) -> Self {
        Self {
            time,
            level,
            gravity,
            players,
            events,
        }
    }

    /// Raise an event at the current time.
    pub fn emit(&mut self, event: GameEvent) {
        self.events.push(SceneEvent::new(self.time, event));
    }
}

/// An external script runtime bound to one level.
///
/// Every method has a no-op default, so a host only implements what its
/// scripts use.
pub trait ScriptHost: std::fmt::Debug {
    /// Compile the level script. Errors become a level load failure.
    fn load(&mut self, source: &str) -> Result<(), String> {
        let _ = source;
        Ok(())
    }

    /// Run `OnLoad`. `Ok(false)` rejects the level.
    fn on_load(&mut self, ctx: &mut ScriptContext<'_>) -> Result<bool, String> {
        let _ = ctx;
        Ok(true)
    }

    /// Run `Tick`, once per hundredth of a second. `Ok(false)` ends play.
    fn tick(&mut self, ctx: &mut ScriptContext<'_>) -> Result<bool, ScriptRuntimeError> {
        let _ = ctx;
        Ok(true)
    }

    /// Call `table.function(args)` if the script defines it.
    fn call_table(
        &mut self,
        table: &str,
        function: &str,
        args: &[ScriptValue],
        ctx: &mut ScriptContext<'_>,
    ) -> Result<(), ScriptRuntimeError> {
        let _ = (table, function, args, ctx);
        Ok(())
    }
}

/// Host for levels without a script.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScriptHost;

impl ScriptHost for NullScriptHost {}
