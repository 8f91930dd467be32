use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, Local, Utc};
use tracing::info;

use duet_chat::attachments::asset_for;
use duet_chat::{ChatEvent, ChatSession, GifClient, GifConfig, retention};
use duet_session::geo::{self, LatLng};
use duet_session::milestones;
use duet_session::telemetry::{Coordinates, DeviceName, LocationFix, partner_telemetry};
use duet_session::{ConnectionCode, DeviceTelemetry, Registration, Route, Session, TelemetryPublisher};
use duet_types::{Gender, Message};

use crate::cli::{ChatCommand, GifCommand, PairCommand, TelemetryCommand};
use crate::context::Context;

// -- Account --

pub async fn register(ctx: &Context, email: String, password: String, username: String, gender: &str) -> Result<()> {
    let gender: Gender = gender.parse().map_err(|e: String| anyhow!(e))?;
    let registration = Registration {
        email,
        password,
        username,
        gender,
    };
    let session = Session::register(ctx.backend.clone(), &registration).await?;
    ctx.save_session().await?;
    println!("Welcome, {}! Next: `duet pair create` or `duet pair join <code>`.", session.user().username);
    Ok(())
}

pub async fn login(ctx: &Context, email: &str, password: &str) -> Result<()> {
    let session = Session::sign_in(ctx.backend.clone(), email, password).await?;
    ctx.save_session().await?;
    println!("Signed in as {}", session.user().username);
    print_route(&session);
    Ok(())
}

pub async fn logout(ctx: &Context) -> Result<()> {
    let session = ctx.session().await?;
    session.sign_out().await?;
    ctx.clear_session().await?;
    println!("Signed out");
    Ok(())
}

pub async fn whoami(ctx: &Context) -> Result<()> {
    let session = ctx.session().await?;
    let user = session.user();
    println!("{} <{}> ({})", user.username, user.email, user.gender.as_str());
    if let Some(relationship) = session.relationship() {
        println!("Relationship {} (code {})", relationship.id, relationship.connection_code);
    }
    if let Some(partner) = session.partner() {
        println!("Partner: {} <{}>", partner.username, partner.email);
    }
    print_route(&session);
    Ok(())
}

fn print_route(session: &Session) {
    match session.route() {
        Route::Onboarding => println!("Not paired yet"),
        Route::WaitingForPartner => println!("Waiting for your partner to join"),
        Route::Home => {}
    }
}

// -- Pairing --

pub async fn pair(ctx: &Context, command: PairCommand) -> Result<()> {
    let mut session = ctx.session().await?;
    match command {
        PairCommand::Create { code } => {
            let code = match code {
                Some(code) => ConnectionCode::parse(&code)?,
                None => ConnectionCode::generate(),
            };
            session.create_relationship(&code).await?;
            println!("Relationship created. Share this code with your partner: {}", code);
        }
        PairCommand::Join { code } => {
            let code = ConnectionCode::parse(&code)?;
            session.join_relationship(&code).await?;
            let partner = session.partner().map(|p| p.username.as_str()).unwrap_or("your partner");
            println!("Joined {}", partner);
        }
        PairCommand::Show => match session.relationship() {
            Some(r) => {
                println!("Relationship {}", r.id);
                println!("  code:     {}", r.connection_code);
                println!("  husband:  {}", r.husband_id.as_deref().unwrap_or("-"));
                println!("  wife:     {}", r.wife_id.as_deref().unwrap_or("-"));
                if let Some(date) = r.relationship_date {
                    println!("  since:    {}", date.with_timezone(&Local).format("%b %-d, %Y"));
                }
            }
            None => println!("Not in a relationship"),
        },
        PairCommand::Delete => {
            session.delete_relationship().await?;
            println!("Relationship deleted");
        }
    }
    Ok(())
}

// -- Chat --

async fn open_chat(ctx: &Context) -> Result<(Session, ChatSession)> {
    let session = ctx.session().await?;
    let identity = session
        .chat_identity()
        .ok_or_else(|| anyhow!("Not in a relationship; pair with your partner first"))?;
    let chat = ChatSession::mount(ctx.backend.clone(), identity).await?;
    Ok((session, chat))
}

fn sender_names(session: &Session) -> HashMap<String, String> {
    let mut names = HashMap::new();
    names.insert(session.user().id.clone(), "me".to_string());
    if let Some(partner) = session.partner() {
        names.insert(partner.id.clone(), partner.username.clone());
    }
    names
}

fn print_message(message: &Message, names: &HashMap<String, String>, prefix: &str) {
    let when = milestones::format_timestamp(&message.created_at.with_timezone(&Local), &Local::now());
    let who = names.get(&message.sender_id).map(String::as_str).unwrap_or("?");
    let body = if message.category().is_attachment() {
        format!("[{}] {}", message.content_type, message.content)
    } else {
        message.content.clone()
    };
    let reply = message
        .reply_to
        .as_deref()
        .map(|id| format!(" (reply to {})", id))
        .unwrap_or_default();
    println!("{}{} {} | {}: {}{}", prefix, message.id, when, who, body, reply);
}

/// Load pages until `id` is cached or history runs out.
async fn find_message(chat: &mut ChatSession, id: &str) -> Result<()> {
    chat.load_initial().await?;
    while chat.message(id).is_none() && chat.has_more() {
        if chat.load_more().await? == 0 {
            break;
        }
    }
    if chat.message(id).is_none() {
        bail!("No message {} in this chat", id);
    }
    Ok(())
}

pub async fn chat(ctx: &Context, command: ChatCommand) -> Result<()> {
    if let ChatCommand::Sweep = command {
        let session = ctx.session().await?;
        let relationship = session.relationship().ok_or_else(|| anyhow!("Not in a relationship"))?;
        let report = retention::sweep(ctx.backend.as_ref(), &relationship.id, Utc::now()).await?;
        println!(
            "Examined {} expired messages: {} deleted, {} failed",
            report.examined, report.deleted, report.failed
        );
        return Ok(());
    }

    let (session, mut chat) = open_chat(ctx).await?;
    let names = sender_names(&session);

    match command {
        ChatCommand::Tail { pages } => {
            chat.load_initial().await?;
            for _ in 0..pages {
                if chat.load_more().await? == 0 {
                    break;
                }
            }
            for message in chat.messages().iter().rev() {
                print_message(message, &names, "  ");
            }

            let shutdown = crate::shutdown_signal();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    change = chat.next_change() => match change {
                        Some(ChatEvent::Created(m)) => print_message(&m, &names, "+ "),
                        Some(ChatEvent::Updated(m)) => print_message(&m, &names, "~ "),
                        Some(ChatEvent::Deleted(id)) => println!("- {}", id),
                        None => {
                            info!("Change feed closed");
                            break;
                        }
                    },
                    _ = &mut shutdown => break,
                }
            }
        }
        ChatCommand::Send { text, reply_to } => {
            if let Some(id) = reply_to.as_deref() {
                find_message(&mut chat, id).await?;
                chat.set_reply_target(Some(id))?;
            }
            let sent = chat.send_text(&text).await?;
            print_message(&sent, &names, "");
        }
        ChatCommand::Gif { url } => {
            let sent = chat.send_gif(&url).await?;
            print_message(&sent, &names, "");
        }
        ChatCommand::Upload { path, mime_type } => {
            let mut asset = asset_for(&path);
            if let Some(mime) = mime_type {
                asset = asset.with_mime_type(mime);
            }
            let sent = chat.send_attachment(&asset).await?;
            print_message(&sent, &names, "");
        }
        ChatCommand::Edit { id, text } => {
            let edited = chat.edit(&id, &text).await?;
            print_message(&edited, &names, "");
        }
        ChatCommand::Delete { id } => {
            find_message(&mut chat, &id).await?;
            chat.delete(&id).await?;
            println!("Deleted {}", id);
        }
        ChatCommand::Sweep => {}
    }

    if let Some(report) = chat.sweep_finished().await
        && report.deleted > 0
    {
        info!("Removed {} messages older than a day", report.deleted);
    }
    chat.close();
    Ok(())
}

// -- GIFs --

pub async fn gifs(command: GifCommand) -> Result<()> {
    let client = GifClient::new(GifConfig::from_env()?)?;
    match command {
        GifCommand::Categories => {
            for category in client.categories().await? {
                println!("{:<24} {}", category.name, category.searchterm);
            }
        }
        GifCommand::Search { query, pos } => {
            let page = client.search(&query, pos.as_deref()).await?;
            for gif in &page.gifs {
                println!("{}  {}", gif.url, gif.description);
            }
            match page.next {
                Some(next) => println!("More: --pos {}", next),
                None => println!("No more results"),
            }
        }
    }
    Ok(())
}

// -- Milestones --

pub async fn milestones(ctx: &Context) -> Result<()> {
    let session = ctx.session().await?;
    let relationship = session.relationship().ok_or_else(|| anyhow!("Not in a relationship"))?;
    let now = Utc::now();

    if let Some(start) = relationship.relationship_date {
        println!("Together:     {}", milestones::relationship_duration(&start, &now));
        println!("              {}", milestones::relationship_days(&start, &now));
        let today = now.with_timezone(&Local).date_naive();
        let start_day = start.with_timezone(&Local).date_naive();
        if let Some(next) = milestones::next_anniversary(start_day, today) {
            println!(
                "Anniversary:  {} ({} days)",
                next.format("%b %-d, %Y"),
                milestones::days_until(next, today)
            );
        }
    }

    let ages: [(&str, Option<DateTime<Utc>>); 2] = [
        ("Husband", relationship.husband_birthday),
        ("Wife", relationship.wife_birthday),
    ];
    for (label, birthday) in ages {
        if let Some(birthday) = birthday {
            println!("{:<13} {}", format!("{} age:", label), milestones::coarse_duration(&birthday, &now));
        }
    }
    Ok(())
}

// -- Telemetry --

pub async fn telemetry(ctx: &Context, command: TelemetryCommand) -> Result<()> {
    let session = ctx.session().await?;
    match command {
        TelemetryCommand::Publish {
            device,
            network,
            battery,
            latitude,
            longitude,
            place,
        } => {
            let location = latitude.zip(longitude).map(|(latitude, longitude)| LocationFix {
                coords: Coordinates {
                    latitude,
                    longitude,
                    ..Coordinates::default()
                },
                timestamp: Some(Utc::now().timestamp_millis() as f64),
            });
            let snapshot = DeviceTelemetry {
                device: device.map(|name| DeviceName { name }),
                network_info: network,
                battery_level: battery,
                location,
                current_location: place,
                ..DeviceTelemetry::default()
            };

            let mut publisher = TelemetryPublisher::new(Arc::clone(session.backend()), session.user().id.clone());
            if !publisher.publish(&snapshot).await {
                bail!("Telemetry was not published; see the log for details");
            }
            println!("Published");
        }
        TelemetryCommand::Partner => {
            let partner = session.partner().context("No partner yet")?;
            let Some(status) = partner_telemetry(partner) else {
                println!("{} has not shared their status", partner.username);
                return Ok(());
            };

            println!("{}", partner.username);
            if let Some(device) = &status.device {
                println!("  device:   {}", device.name);
            }
            if let Some(network) = &status.network_info {
                println!("  network:  {}", network);
            }
            if let Some(percent) = status.battery_percent() {
                println!("  battery:  {}%", percent);
            }
            if let Some(place) = &status.current_location {
                println!("  place:    {}", place);
            }
            let mine = partner_telemetry(session.user());
            if let (Some(theirs), Some(ours)) = (
                status.coordinates(),
                mine.as_ref().and_then(DeviceTelemetry::coordinates),
            ) {
                let a = LatLng::new(ours.latitude, ours.longitude);
                let b = LatLng::new(theirs.latitude, theirs.longitude);
                println!("  distance: {:.2} km", geo::distance_km(a, b));
            }
        }
    }
    Ok(())
}
