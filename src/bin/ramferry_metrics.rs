use anyhow::{anyhow, Result};
use clap::Parser;
use tiny_http::{Header, Response, Server};

use RamFerry::metrics;

#[derive(Parser, Debug)]
#[command(
    name = "ramferry_metrics",
    version,
    about = "RamFerry metrics exporter (Prometheus)"
)]
struct Opt {
    #[arg(long, default_value = "0.0.0.0:9899")]
    addr: String,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::parse();

    let server = Server::http(&opt.addr)
        .map_err(|e| anyhow!("bind http at {}: {}", opt.addr, e))?;
    println!("ramferry_metrics listening on {}", opt.addr);

    loop {
        let rq = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                eprintln!("http recv error: {}", e);
                continue;
            }
        };

        let url = rq.url().to_string();
        let method = rq.method().as_str().to_string();

        if method == "GET" && (url == "/" || url == "/health" || url == "/ready") {
            let resp = Response::from_string("OK\n").with_status_code(200);
            let _ = rq.respond(resp);
            continue;
        }

        if method == "GET" && url == "/metrics" {
            let mut resp = Response::from_string(build_metrics());
            if let Ok(ct) = Header::from_bytes(b"Content-Type", b"text/plain; version=0.0.4") {
                resp.add_header(ct);
            }
            let _ = rq.respond(resp);
            continue;
        }

        let resp = Response::from_string("not found\n").with_status_code(404);
        let _ = rq.respond(resp);
    }
}

fn build_metrics() -> String {
    let m = metrics::snapshot();
    let mut out = String::new();

    let ver = env!("CARGO_PKG_VERSION");
    out.push_str("# HELP ramferry_build_info Build info.\n");
    out.push_str("# TYPE ramferry_build_info gauge\n");
    out.push_str(&format!("ramferry_build_info{{version=\"{}\"}} 1\n", ver));

    // --- Send path ---
    out.push_str("# HELP ramferry_send_bytes Bytes written to migration channels.\n");
    out.push_str("# TYPE ramferry_send_bytes counter\n");
    out.push_str(&format!("ramferry_send_bytes {}\n", m.send_bytes));

    out.push_str("# HELP ramferry_send_packets Packets sent (incl. sync).\n");
    out.push_str("# TYPE ramferry_send_packets counter\n");
    out.push_str(&format!("ramferry_send_packets {}\n", m.send_packets));

    out.push_str("# HELP ramferry_send_pages Pages sent.\n");
    out.push_str("# TYPE ramferry_send_pages counter\n");
    out.push_str(&format!("ramferry_send_pages {}\n", m.send_pages));

    out.push_str("# HELP ramferry_send_syncs Sync packets sent.\n");
    out.push_str("# TYPE ramferry_send_syncs counter\n");
    out.push_str(&format!("ramferry_send_syncs {}\n", m.send_syncs));

    out.push_str("# HELP ramferry_send_pages_per_packet Average pages per data packet.\n");
    out.push_str("# TYPE ramferry_send_pages_per_packet gauge\n");
    out.push_str(&format!(
        "ramferry_send_pages_per_packet {:.2}\n",
        m.avg_pages_per_packet()
    ));

    // --- Recv path ---
    out.push_str("# HELP ramferry_recv_bytes Bytes read from migration channels.\n");
    out.push_str("# TYPE ramferry_recv_bytes counter\n");
    out.push_str(&format!("ramferry_recv_bytes {}\n", m.recv_bytes));

    out.push_str("# HELP ramferry_recv_packets Packets received (incl. sync).\n");
    out.push_str("# TYPE ramferry_recv_packets counter\n");
    out.push_str(&format!("ramferry_recv_packets {}\n", m.recv_packets));

    out.push_str("# HELP ramferry_recv_pages Pages received.\n");
    out.push_str("# TYPE ramferry_recv_pages counter\n");
    out.push_str(&format!("ramferry_recv_pages {}\n", m.recv_pages));

    out.push_str("# HELP ramferry_recv_syncs Sync packets received.\n");
    out.push_str("# TYPE ramferry_recv_syncs counter\n");
    out.push_str(&format!("ramferry_recv_syncs {}\n", m.recv_syncs));

    // --- Failures ---
    out.push_str("# HELP ramferry_handshake_failures Rejected channel handshakes.\n");
    out.push_str("# TYPE ramferry_handshake_failures counter\n");
    out.push_str(&format!(
        "ramferry_handshake_failures {}\n",
        m.handshake_failures
    ));

    out.push_str("# HELP ramferry_channel_errors Channels failed with an I/O or protocol error.\n");
    out.push_str("# TYPE ramferry_channel_errors counter\n");
    out.push_str(&format!("ramferry_channel_errors {}\n", m.channel_errors));

    out
}
