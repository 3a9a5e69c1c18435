//! Shared test servlets for the scenario-level integration tests in this
//! directory, standing in for the real servlet implementations that ship as
//! separate crates in a full deployment (spec §1: individual servlet
//! implementations are an out-of-scope external collaborator).

use async_trait::async_trait;

use plumber_core::{ExecPipes, Pdt, RequestScope, Result, Servlet};

/// Copies everything read from pipe 0 to pipe 1.
pub struct EchoServlet {
    pdt: Pdt,
}

impl EchoServlet {
    pub fn new() -> Self {
        EchoServlet { pdt: Pdt::new(["in", "out"]) }
    }
}

#[async_trait]
impl Servlet for EchoServlet {
    fn pdt(&self) -> &Pdt {
        &self.pdt
    }

    async fn exec(&self, pipes: &mut ExecPipes<'_>, _scope: &RequestScope) -> Result<()> {
        copy_all(pipes, 0, 1).await
    }
}

/// Always fails; never touches any output.
pub struct FailingServlet {
    pdt: Pdt,
}

impl FailingServlet {
    pub fn new() -> Self {
        FailingServlet { pdt: Pdt::new(["in", "out"]) }
    }
}

#[async_trait]
impl Servlet for FailingServlet {
    fn pdt(&self) -> &Pdt {
        &self.pdt
    }

    async fn exec(&self, _pipes: &mut ExecPipes<'_>, _scope: &RequestScope) -> Result<()> {
        Err(plumber_core::Error::ModuleError("induced failure".into()))
    }
}

/// Reads pipe 0 and writes it to both pipe 1 and pipe 2 — the fan-out node
/// of a diamond graph.
pub struct SplitServlet {
    pdt: Pdt,
}

impl SplitServlet {
    pub fn new() -> Self {
        SplitServlet { pdt: Pdt::new(["in", "out_a", "out_b"]) }
    }
}

#[async_trait]
impl Servlet for SplitServlet {
    fn pdt(&self) -> &Pdt {
        &self.pdt
    }

    async fn exec(&self, pipes: &mut ExecPipes<'_>, _scope: &RequestScope) -> Result<()> {
        let data = read_all(pipes, 0).await?;
        pipes.write(1, &data).await?;
        pipes.write(2, &data).await?;
        Ok(())
    }
}

/// Joins two upstream inputs, tolerating either one being cancelled —
/// the join node of a diamond graph where one branch may have failed.
pub struct JoinServlet {
    pdt: Pdt,
}

impl JoinServlet {
    pub fn new() -> Self {
        JoinServlet { pdt: Pdt::new(["in_a", "in_b", "out"]) }
    }
}

#[async_trait]
impl Servlet for JoinServlet {
    fn pdt(&self) -> &Pdt {
        &self.pdt
    }

    async fn exec(&self, pipes: &mut ExecPipes<'_>, _scope: &RequestScope) -> Result<()> {
        let mut out = Vec::new();
        for local in [0u16, 1u16] {
            if pipes.is_bound(local) {
                out.extend_from_slice(&read_all(pipes, local).await?);
            }
        }
        pipes.write(2, &out).await?;
        Ok(())
    }
}

pub async fn read_all(pipes: &mut ExecPipes<'_>, pipe: u16) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = pipes.read(pipe, &mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    Ok(data)
}

async fn copy_all(pipes: &mut ExecPipes<'_>, from: u16, to: u16) -> Result<()> {
    let data = read_all(pipes, from).await?;
    pipes.write(to, &data).await?;
    Ok(())
}
