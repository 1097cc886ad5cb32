//! A small interpreter for sequences of steps with conditional branches.

use crate::Error;
use std::time::Instant;
use tracing::instrument;

/// A unit of work, operating on a context `C` with an environment `E`.
#[async_trait::async_trait]
pub trait Step<C: Send, E: Sync>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, context: &mut C, env: &E) -> Result<(), Error>;
}

pub type Predicate<C, E> = fn(&C, &E) -> bool;

pub enum Node<C, E> {
    Step(Box<dyn Step<C, E>>),
    /// Run the nodes if the predicate holds
    If(Predicate<C, E>, Vec<Node<C, E>>),
    IfElse(Predicate<C, E>, Vec<Node<C, E>>, Vec<Node<C, E>>),
}

impl<C: Send, E: Sync> Node<C, E> {
    pub fn step(step: impl Step<C, E> + 'static) -> Self {
        Self::Step(Box::new(step))
    }
}

pub struct Workflow<C, E> {
    name: String,
    nodes: Vec<Node<C, E>>,
    cleanup: Vec<Box<dyn Step<C, E>>>,
}

impl<C: Send, E: Sync> Workflow<C, E> {
    pub fn new(name: impl Into<String>, nodes: Vec<Node<C, E>>) -> Self {
        Self {
            name: name.into(),
            nodes,
            cleanup: vec![],
        }
    }

    /// Add a step which runs after the workflow returned, no matter the outcome.
    ///
    /// Failing cleanup steps are logged, but don't change the outcome.
    pub fn with_cleanup(mut self, step: impl Step<C, E> + 'static) -> Self {
        self.cleanup.push(Box::new(step));
        self
    }

    /// Run all nodes in order. The first failing step ends the workflow.
    #[instrument(skip_all, fields(workflow = %self.name), err)]
    pub async fn process(&self, context: &mut C, env: &E) -> Result<(), Error> {
        log::debug!("Workflow {} is running", self.name);

        let result = self.run(context, env).await;

        for step in &self.cleanup {
            if let Err(err) = step.run(context, env).await {
                log::warn!("Cleanup step {} failed: {err}", step.name());
            }
        }

        match &result {
            Ok(()) => log::debug!("Workflow {} succeeded", self.name),
            Err(err) => log::info!("Workflow {} failed: {err}", self.name),
        }

        result
    }

    async fn run(&self, context: &mut C, env: &E) -> Result<(), Error> {
        let mut stack = vec![self.nodes.iter()];

        while let Some(nodes) = stack.last_mut() {
            let Some(node) = nodes.next() else {
                stack.pop();
                continue;
            };

            match node {
                Node::Step(step) => {
                    let start = Instant::now();
                    log::debug!("Running step {}", step.name());
                    step.run(context, env).await?;
                    log::debug!("Step {} took {:?}", step.name(), start.elapsed());
                }
                Node::If(predicate, then) => {
                    if predicate(context, env) {
                        stack.push(then.iter());
                    }
                }
                Node::IfElse(predicate, then, otherwise) => {
                    if predicate(context, env) {
                        stack.push(then.iter());
                    } else {
                        stack.push(otherwise.iter());
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[derive(Default)]
    struct Trace {
        steps: Vec<String>,
        container: bool,
    }

    struct Record(&'static str);

    #[async_trait::async_trait]
    impl Step<Trace, ()> for Record {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, context: &mut Trace, _: &()) -> Result<(), Error> {
            context.steps.push(self.0.to_string());
            Ok(())
        }
    }

    struct Fail;

    #[async_trait::async_trait]
    impl Step<Trace, ()> for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        async fn run(&self, _: &mut Trace, _: &()) -> Result<(), Error> {
            Err(Error::NotFound("build".into()))
        }
    }

    fn is_container(context: &Trace, _: &()) -> bool {
        context.container
    }

    fn workflow(fail: bool) -> Workflow<Trace, ()> {
        let mut unpacked = vec![Node::step(Record("dedup")), Node::step(Record("scan"))];
        if fail {
            unpacked.insert(1, Node::step(Fail));
        }

        Workflow::new(
            "test",
            vec![
                Node::step(Record("download")),
                Node::If(is_container, vec![Node::step(Record("mapping"))]),
                Node::step(Record("unpack")),
                Node::IfElse(is_container, vec![Node::step(Record("fork"))], unpacked),
                Node::step(Record("done")),
            ],
        )
        .with_cleanup(Record("cleanup"))
    }

    #[test(tokio::test)]
    async fn branches() -> anyhow::Result<()> {
        let mut context = Trace::default();
        workflow(false).process(&mut context, &()).await?;
        assert_eq!(
            context.steps,
            ["download", "unpack", "dedup", "scan", "done", "cleanup"]
        );

        let mut context = Trace {
            container: true,
            ..Default::default()
        };
        workflow(false).process(&mut context, &()).await?;
        assert_eq!(
            context.steps,
            ["download", "mapping", "unpack", "fork", "done", "cleanup"]
        );

        Ok(())
    }

    #[test(tokio::test)]
    async fn first_error_halts() {
        let mut context = Trace::default();
        let result = workflow(true).process(&mut context, &()).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(context.steps, ["download", "unpack", "dedup", "cleanup"]);
    }
}
