//! The application: component registry and main loop

use crate::{Clock, Component, Scheduler};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info};

/// Owns the component list and the scheduler and drives both
pub struct Application {
    name: String,
    scheduler: Scheduler,
    components: RefCell<Vec<Rc<dyn Component>>>,
    setup_complete: Cell<bool>,
    loop_count: Cell<u64>,
}

impl Application {
    /// Create an application whose scheduler runs on `clock`
    pub fn new(name: impl Into<String>, clock: Rc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            scheduler: Scheduler::new(clock),
            components: RefCell::new(Vec::new()),
            setup_complete: Cell::new(false),
            loop_count: Cell::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scheduler shared by every component of this application
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn millis(&self) -> u64 {
        self.scheduler.millis()
    }

    /// Register a component; returns the same handle for chaining
    pub fn register_component<C: Component + 'static>(&self, component: Rc<C>) -> Rc<C> {
        self.components.borrow_mut().push(component.clone());
        component
    }

    pub fn component_count(&self) -> usize {
        self.components.borrow().len()
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.get()
    }

    /// Run `setup()` on every component, highest priority first
    ///
    /// Components with equal priority keep their registration order.
    pub fn setup(&self) {
        info!("Running setup for '{}'", self.name);

        // Stable sort keeps registration order for ties
        self.components
            .borrow_mut()
            .sort_by(|a, b| b.setup_priority().total_cmp(&a.setup_priority()));

        for component in self.snapshot() {
            debug!(
                "Setting up {} (priority {:.1})",
                component.component_name(),
                component.setup_priority()
            );
            component.setup();
        }
        self.setup_complete.set(true);

        for component in self.snapshot() {
            component.dump_config();
        }
    }

    /// Run one iteration of the main loop
    pub fn loop_once(&self) {
        for component in self.snapshot() {
            component.on_loop();
        }
        self.scheduler.call();
        self.loop_count.set(self.loop_count.get() + 1);
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count.get()
    }

    /// Notify components of shutdown, in reverse setup order
    pub fn shutdown(&self) {
        info!("Shutting down '{}'", self.name);
        for component in self.snapshot().iter().rev() {
            component.on_shutdown();
        }
    }

    fn snapshot(&self) -> Vec<Rc<dyn Component>> {
        self.components.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{setup_priority, ManualClock};

    struct Recorder {
        name: &'static str,
        priority: f32,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Component for Recorder {
        fn component_name(&self) -> &str {
            self.name
        }

        fn setup(&self) {
            self.log.borrow_mut().push(format!("setup {}", self.name));
        }

        fn on_loop(&self) {
            self.log.borrow_mut().push(format!("loop {}", self.name));
        }

        fn setup_priority(&self) -> f32 {
            self.priority
        }

        fn on_shutdown(&self) {
            self.log.borrow_mut().push(format!("shutdown {}", self.name));
        }
    }

    fn app_with(
        entries: &[(&'static str, f32)],
    ) -> (Application, Rc<RefCell<Vec<String>>>) {
        let app = Application::new("test", Rc::new(ManualClock::new()));
        let log = Rc::new(RefCell::new(Vec::new()));
        for &(name, priority) in entries {
            app.register_component(Rc::new(Recorder {
                name,
                priority,
                log: log.clone(),
            }));
        }
        (app, log)
    }

    #[test]
    fn test_setup_runs_by_priority() {
        let (app, log) = app_with(&[
            ("late", setup_priority::LATE),
            ("bus", setup_priority::BUS),
            ("data_a", setup_priority::DATA),
            ("data_b", setup_priority::DATA),
        ]);

        app.setup();
        assert!(app.is_setup_complete());
        assert_eq!(
            *log.borrow(),
            vec!["setup bus", "setup data_a", "setup data_b", "setup late"]
        );
    }

    #[test]
    fn test_loop_and_shutdown_order() {
        let (app, log) = app_with(&[("a", setup_priority::BUS), ("b", setup_priority::DATA)]);
        app.setup();
        log.borrow_mut().clear();

        app.loop_once();
        app.shutdown();
        assert_eq!(
            *log.borrow(),
            vec!["loop a", "loop b", "shutdown b", "shutdown a"]
        );
        assert_eq!(app.loop_count(), 1);
    }

    #[test]
    fn test_loop_once_drives_scheduler() {
        let clock = ManualClock::new();
        let app = Application::new("test", Rc::new(clock.clone()));
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        app.scheduler()
            .set_timeout(crate::ComponentId::next(), "t", 10, move || f.set(true));

        clock.advance(10);
        app.loop_once();
        assert!(fired.get());
    }
}
