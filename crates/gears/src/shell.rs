use crate::cluster::Node;
use anyhow::Context;
use commands::{ResponseSink, Status};
use execution::Client;
use model::Reply;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Split a command line into arguments. Arguments are separated by whitespace,
/// and may be "double quoted" (with \" and \\ escapes) or 'single quoted'.
pub fn tokenize(line: &str) -> anyhow::Result<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            return Ok(args);
        };

        let mut arg = String::new();
        if first == '"' || first == '\'' {
            chars.next();
            loop {
                match chars.next() {
                    None => anyhow::bail!("unterminated quoted argument"),
                    Some(c) if c == first => break,
                    Some('\\') if first == '"' => match chars.next() {
                        Some('n') => arg.push('\n'),
                        Some('t') => arg.push('\t'),
                        Some(c) => arg.push(c),
                        None => anyhow::bail!("unterminated quoted argument"),
                    },
                    Some(c) => arg.push(c),
                }
            }
            if chars.peek().is_some_and(|c| !c.is_whitespace()) {
                anyhow::bail!("closing quote must be followed by a space");
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                arg.push(c);
            }
        }
        args.push(arg);
    }
}

/// Run an interactive shell over stdin, dispatching each line as a command
/// of the selected member. `@<n>` selects the n'th member (from 1),
/// and `QUIT` exits. Ctrl-C disconnects a command which is blocked.
pub async fn run(nodes: &[Node]) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();
    let sink: Arc<dyn ResponseSink> = Arc::new(tx);

    // Replies may arrive after their command returns, so they're printed as they come.
    let printer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            println!("{reply}");
        }
    });

    let mut selected = 0;
    let mut next_client = 1;
    let mut client = Client::new(next_client);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    for (index, node) in nodes.iter().enumerate() {
        println!("@{} is {}", index + 1, node.id);
    }

    while let Some(line) = lines.next_line().await? {
        let args = match tokenize(&line) {
            Ok(args) => args,
            Err(err) => {
                sink.send(Reply::error(err.to_string()));
                continue;
            }
        };
        let Some((name, args)) = args.split_first() else {
            continue;
        };

        if let Some(member) = name.strip_prefix('@') {
            match member.parse::<usize>() {
                Ok(n) if (1..=nodes.len()).contains(&n) => {
                    selected = n - 1;
                    sink.send(Reply::simple(format!("selected {}", nodes[selected].id)));
                }
                _ => sink.send(Reply::error(format!("no member {name}"))),
            }
            continue;
        } else if name.eq_ignore_ascii_case("QUIT") {
            break;
        }

        let status = {
            let dispatch = nodes[selected]
                .commands
                .dispatch(name, args, &client, sink.clone());
            tokio::pin!(dispatch);

            let interrupted = tokio::select! {
                status = &mut dispatch => Err(status),
                result = tokio::signal::ctrl_c() => Ok(result),
            };
            match interrupted {
                Err(status) => status,
                Ok(result) => {
                    result.context("failed to listen for ctrl-c")?;
                    client.disconnect();
                    dispatch.await
                }
            }
        };
        tracing::debug!(command = %name, %status, "dispatched");

        // A disconnected client is replaced by a new connection.
        if status == Status::Cancelled || !client.is_connected() {
            next_client += 1;
            client = Client::new(next_client);
        }
    }

    std::mem::drop(sink);
    printer.await?;
    Ok(())
}
